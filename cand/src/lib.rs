mod error;
pub use error::*;

pub mod backend;
pub mod config;
pub mod listen;
pub mod reactor;
pub mod socket;
pub mod util;
