use anyhow::Context;
use tokio::task;

use cand::backend::{self, AsyncCanSocket, AsyncIsoTpSocket};
use cand::config::{self, Command, Config};
use cand::reactor::Reactor;
use cand::socket::{CanBcmSocket, CanFilter, CanRawSocket};
use cand::{listen, util};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let matches = config::args().get_matches();
    let Config { interface, command } = Config::from_matches(&matches)?;

    match command {
        Command::Dump { filters } => dump(&interface, &filters).await,
        Command::Send { frame } => {
            CanRawSocket::open(&interface)?.send(&frame)?;
            Ok(())
        }
        Command::Cyclic { frame, interval } => {
            let bcm = CanBcmSocket::open(&interface)?;
            bcm.setup_cyclic_transmit(&frame, interval)?;
            log::info!("Sending {} every {:?}, ^C to stop", frame, interval);

            tokio::signal::ctrl_c().await?;
            bcm.delete_cyclic_transmit(&frame)?;
            Ok(())
        }
        Command::IsoTpSend { rx_id, tx_id, data } => {
            let socket = AsyncIsoTpSocket::open(&interface, rx_id, tx_id)?;
            socket.send(&data).await?;
            Ok(())
        }
        Command::IsoTpRecv { rx_id, tx_id } => {
            let socket = AsyncIsoTpSocket::open(&interface, rx_id, tx_id)?;
            loop {
                tokio::select! {
                    pdu = socket.recv() => {
                        let pdu = pdu.context("ISO-TP receive failed")?;
                        let hex: String = pdu.iter().map(|b| format!("{:02X}", b)).collect();
                        println!("{}", hex);
                    }
                    res = tokio::signal::ctrl_c() => return Ok(res?),
                }
            }
        }
        Command::Bridge { listen: addr } => {
            let (stream, sink, uplink) = backend::socketcan::connect(&interface)
                .with_context(|| format!("Could not open {}", interface))?;

            let (mut reactor, mut handle) = Reactor::new();
            handle.register_uplink(stream, sink, uplink).await?;

            task::spawn(util::catch_error(listen::tcp::listen(addr, handle)));

            Ok(reactor.run().await?)
        }
    }
}

async fn dump(interface: &str, filters: &[u32]) -> anyhow::Result<()> {
    let socket = AsyncCanSocket::open(interface)?;
    if !filters.is_empty() {
        let filters: Vec<CanFilter> = filters.iter().copied().map(CanFilter::exact).collect();
        socket.get_ref().set_filters(&filters)?;
    }

    loop {
        tokio::select! {
            frame = socket.recv() => println!("{}  {}", interface, frame?),
            res = tokio::signal::ctrl_c() => return Ok(res?),
        }
    }
}
