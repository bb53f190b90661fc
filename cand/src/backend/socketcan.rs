use std::sync::Arc;

use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use socketcan_proto::CanFrame;
use tokio::task;

use super::{is_transient, AsyncCanSocket};
use crate::util;

/// Opens `interface` and pumps frames between it and a pair of channels.
///
/// Returns the received frames, a sender for frames to transmit and the task
/// that ends once either direction fails or its channel is closed.
pub fn connect(
    interface: &str,
) -> crate::Result<(
    mpsc::UnboundedReceiver<CanFrame>,
    mpsc::UnboundedSender<CanFrame>,
    task::JoinHandle<()>,
)> {
    let socket = Arc::new(AsyncCanSocket::open(interface)?);

    let (sender, stream) = mpsc::unbounded();
    let (sink, receiver) = mpsc::unbounded();

    let rx = util::kill_task_on_drop(task::spawn(read_can_frames(socket.clone(), sender)));
    let tx = util::kill_task_on_drop(task::spawn(write_can_frames(socket, receiver)));

    let interface = interface.to_owned();
    let task = task::spawn(async move {
        let res = tokio::select! {
            res = rx => res,
            res = tx => res,
        };
        match res {
            Ok(Ok(())) => log::info!("CAN interface {} closed", interface),
            Ok(Err(e)) => {
                log::error!("Connection to CAN interface {} failed: {}", interface, e);
                log::debug!("Details: {:?}", e);
            }
            Err(e) => log::error!("CAN task for {} died: {}", interface, e),
        }
    });

    Ok((stream, sink, task))
}

async fn read_can_frames(
    socket: Arc<AsyncCanSocket>,
    mut sender: mpsc::UnboundedSender<CanFrame>,
) -> crate::Result<()> {
    loop {
        let frame = socket.recv().await?;
        if sender.send(frame).await.is_err() {
            return Ok(());
        }
    }
}

async fn write_can_frames(
    socket: Arc<AsyncCanSocket>,
    mut receiver: mpsc::UnboundedReceiver<CanFrame>,
) -> crate::Result<()> {
    while let Some(frame) = receiver.next().await {
        match socket.send(&frame).await {
            Ok(()) => {}
            Err(e) if is_transient(&e) => {
                log::warn!("Dropped frame {}: {}", frame, e);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
