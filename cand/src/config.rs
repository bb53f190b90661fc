use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Arg, ArgAction, ArgMatches};
use socketcan_proto::frame::parse_hex;
use socketcan_proto::CanFrame;

pub fn args() -> clap::Command {
    let interface = Arg::new("interface")
        .short('i')
        .long("interface")
        .action(ArgAction::Set)
        .help("CAN interface to use")
        .default_value("vcan0");

    let isotp_ids = [
        Arg::new("rx-id")
            .long("rx-id")
            .required(true)
            .action(ArgAction::Set)
            .help("Identifier to receive on (hex)"),
        Arg::new("tx-id")
            .long("tx-id")
            .required(true)
            .action(ArgAction::Set)
            .help("Identifier to send on (hex)"),
    ];

    clap::command!()
        .subcommand_required(true)
        .arg(interface.global(true))
        .subcommand(
            clap::Command::new("dump")
                .about("Print every frame seen on the interface")
                .arg(
                    Arg::new("filter")
                        .short('f')
                        .long("filter")
                        .action(ArgAction::Append)
                        .help("Only show this identifier (hex), may be repeated"),
                ),
        )
        .subcommand(
            clap::Command::new("send")
                .about("Send a single frame, e.g. 123#DEADBEEF")
                .arg(Arg::new("frame").required(true).action(ArgAction::Set)),
        )
        .subcommand(
            clap::Command::new("cyclic")
                .about("Let the kernel send a frame periodically until interrupted")
                .arg(Arg::new("frame").required(true).action(ArgAction::Set))
                .arg(
                    Arg::new("interval")
                        .short('t')
                        .long("interval")
                        .action(ArgAction::Set)
                        .help("Period in milliseconds")
                        .default_value("100"),
                ),
        )
        .subcommand(
            clap::Command::new("isotp-send")
                .about("Send one ISO-TP PDU")
                .args(isotp_ids.clone())
                .arg(
                    Arg::new("data")
                        .required(true)
                        .action(ArgAction::Set)
                        .help("Payload as hex"),
                ),
        )
        .subcommand(
            clap::Command::new("isotp-recv")
                .about("Print received ISO-TP PDUs")
                .args(isotp_ids),
        )
        .subcommand(
            clap::Command::new("bridge")
                .about("Share the interface with TCP clients")
                .arg(
                    Arg::new("listen")
                        .short('l')
                        .long("listen")
                        .action(ArgAction::Set)
                        .help("Address to accept clients on")
                        .default_value("[::]:2342"),
                ),
        )
}

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Dump { filters: Vec<u32> },
    Send { frame: CanFrame },
    Cyclic { frame: CanFrame, interval: Duration },
    IsoTpSend { rx_id: u32, tx_id: u32, data: Vec<u8> },
    IsoTpRecv { rx_id: u32, tx_id: u32 },
    Bridge { listen: SocketAddr },
}

#[derive(Debug, PartialEq, Eq)]
pub struct Config {
    pub interface: String,
    pub command: Command,
}

impl Config {
    pub fn from_matches(matches: &ArgMatches) -> anyhow::Result<Config> {
        let interface = required(matches, "interface")?.to_owned();

        let command = match matches.subcommand() {
            Some(("dump", sub)) => Command::Dump {
                filters: sub
                    .get_many::<String>("filter")
                    .unwrap_or_default()
                    .map(|id| parse_id(id))
                    .collect::<anyhow::Result<_>>()?,
            },
            Some(("send", sub)) => Command::Send {
                frame: parse_frame(required(sub, "frame")?)?,
            },
            Some(("cyclic", sub)) => {
                let interval = required(sub, "interval")?;
                let millis: u64 = interval
                    .parse()
                    .with_context(|| format!("Invalid interval {:?}", interval))?;
                if millis == 0 {
                    return Err(anyhow!("Interval must not be zero"));
                }
                Command::Cyclic {
                    frame: parse_frame(required(sub, "frame")?)?,
                    interval: Duration::from_millis(millis),
                }
            }
            Some(("isotp-send", sub)) => {
                let data = required(sub, "data")?;
                Command::IsoTpSend {
                    rx_id: parse_id(required(sub, "rx-id")?)?,
                    tx_id: parse_id(required(sub, "tx-id")?)?,
                    data: parse_hex(data).ok_or_else(|| anyhow!("Invalid payload {:?}", data))?,
                }
            }
            Some(("isotp-recv", sub)) => Command::IsoTpRecv {
                rx_id: parse_id(required(sub, "rx-id")?)?,
                tx_id: parse_id(required(sub, "tx-id")?)?,
            },
            Some(("bridge", sub)) => {
                let listen = required(sub, "listen")?;
                Command::Bridge {
                    listen: listen
                        .parse()
                        .with_context(|| format!("Invalid listen address {:?}", listen))?,
                }
            }
            _ => return Err(anyhow!("No command given")),
        };

        Ok(Config { interface, command })
    }
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> anyhow::Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("Missing argument {}", name))
}

fn parse_id(s: &str) -> anyhow::Result<u32> {
    let digits = s.trim_start_matches("0x");
    let id = u32::from_str_radix(digits, 16).with_context(|| format!("Invalid CAN id {:?}", s))?;
    if id > socketcan_proto::frame::EFF_MASK {
        return Err(anyhow!("CAN id {:#x} does not fit in 29 bits", id));
    }
    Ok(id)
}

fn parse_frame(s: &str) -> anyhow::Result<CanFrame> {
    Ok(s.parse()?)
}
