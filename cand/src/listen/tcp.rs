use std::net::SocketAddr;

use futures::channel::mpsc;
use futures::{SinkExt, Stream, StreamExt};
use socketcan_proto::{CanFrame, CanFrameCodec};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::reactor::ReactorHandle;

/// Accepts clients on `addr` and registers each of them with the reactor.
pub async fn listen(addr: SocketAddr, handle: ReactorHandle) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("Listening on {}", listener.local_addr()?);
    serve(listener, handle).await
}

pub async fn serve(listener: TcpListener, mut handle: ReactorHandle) -> anyhow::Result<()> {
    loop {
        let (conn, addr) = listener.accept().await?;
        log::debug!("New connection from {}", addr);

        let (stream, sink, task) = handle_client(conn, addr);
        handle.register_client(stream, sink, task).await?;
    }
}

fn handle_client(
    client: TcpStream,
    addr: SocketAddr,
) -> (
    impl Stream<Item = CanFrame>,
    mpsc::UnboundedSender<CanFrame>,
    task::JoinHandle<()>,
) {
    let (read, write) = client.into_split();

    let (sender, stream) = mpsc::unbounded();
    let (sink, receiver) = mpsc::unbounded();

    let task = task::spawn(async move {
        let res = tokio::select! {
            res = read_from_client(read, sender) => res,
            res = write_to_client(write, receiver) => res,
        };
        match res {
            Ok(()) => log::debug!("Client {} disconnected", addr),
            Err(e) => log::debug!("Client {} error: {:?}", addr, e),
        }
    });

    (stream, sink, task)
}

async fn read_from_client(
    read: OwnedReadHalf,
    mut sender: mpsc::UnboundedSender<CanFrame>,
) -> anyhow::Result<()> {
    let codec: CanFrameCodec = CanFrameCodec::new();
    let mut frames = FramedRead::new(read, codec);
    while let Some(frame) = frames.next().await {
        let frame = frame?;
        log::trace!("Client sent {}", frame);
        sender.send(frame).await?;
    }
    Ok(())
}

async fn write_to_client(
    write: OwnedWriteHalf,
    mut receiver: mpsc::UnboundedReceiver<CanFrame>,
) -> anyhow::Result<()> {
    let codec: CanFrameCodec = CanFrameCodec::new();
    let mut frames = FramedWrite::new(write, codec);
    while let Some(frame) = receiver.next().await {
        frames.send(frame).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::Reactor;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;

    #[tokio::test]
    async fn bridges_frames_between_client_and_uplink() {
        let (mut reactor, mut handle) = Reactor::new();
        tokio::spawn(async move { reactor.run().await });

        let (mut to_reactor, read) = mpsc::unbounded();
        let (write, mut from_reactor) = mpsc::unbounded();
        let (_alive, dead) = tokio::sync::oneshot::channel::<()>();
        let uplink = tokio::spawn(async move {
            let _ = dead.await;
        });
        handle.register_uplink(read, write, uplink).await.unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, handle));

        let mut client = TcpStream::connect(addr).await.unwrap();

        let sent = CanFrame::new(0x123, &[0xde, 0xad]).unwrap();
        client.write_all(&sent.to_bytes()).await.unwrap();
        let got = timeout(Duration::from_secs(1), from_reactor.next())
            .await
            .unwrap();
        assert_eq!(got, Some(sent));

        // the client is registered now, so uplink traffic reaches it
        let reply = CanFrame::new(0x1abcdef, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        to_reactor.send(reply).await.unwrap();

        let mut buf = [0u8; 16];
        timeout(Duration::from_secs(1), client.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(CanFrame::from_bytes(&buf).unwrap(), reply);
    }
}
