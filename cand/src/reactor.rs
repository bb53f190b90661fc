use futures::channel::mpsc;
use futures::{SinkExt, Stream, StreamExt};
use slotmap::DenseSlotMap;
use socketcan_proto::CanFrame;
use tokio::task::{self, JoinHandle};

use crate::util::{self, KillJoinHandle};

slotmap::new_key_type! {
    struct Task;
}

type FrameStream = Box<dyn Stream<Item = CanFrame> + Send + Unpin>;

enum ReactorMessage {
    Register {
        uplink: bool,
        read: FrameStream,
        write: mpsc::UnboundedSender<CanFrame>,
        task: JoinHandle<()>,
    },
    TaskDied {
        task: Task,
    },
    Frame {
        source: Task,
        frame: CanFrame,
    },
}

#[derive(Clone)]
pub struct ReactorHandle {
    sender: mpsc::Sender<ReactorMessage>,
}

impl ReactorHandle {
    /// Adds a network client. Its frames go to the uplink, it receives
    /// everything the uplink reads.
    pub async fn register_client<In>(
        &mut self,
        read: In,
        write: mpsc::UnboundedSender<CanFrame>,
        task: JoinHandle<()>,
    ) -> crate::Result<()>
    where
        In: Stream<Item = CanFrame> + Send + Unpin + 'static,
    {
        self.register(false, Box::new(read), write, task).await
    }

    /// Adds the CAN side.
    pub async fn register_uplink<In>(
        &mut self,
        read: In,
        write: mpsc::UnboundedSender<CanFrame>,
        task: JoinHandle<()>,
    ) -> crate::Result<()>
    where
        In: Stream<Item = CanFrame> + Send + Unpin + 'static,
    {
        self.register(true, Box::new(read), write, task).await
    }

    async fn register(
        &mut self,
        uplink: bool,
        read: FrameStream,
        write: mpsc::UnboundedSender<CanFrame>,
        task: JoinHandle<()>,
    ) -> crate::Result<()> {
        self.sender
            .send(ReactorMessage::Register {
                uplink,
                read,
                write,
                task,
            })
            .await
            .map_err(|_| crate::Error::ReactorClosed)
    }
}

struct TaskData {
    uplink: bool,
    sink: mpsc::UnboundedSender<CanFrame>,
    supervisor: Option<KillJoinHandle<()>>,
    reader: Option<KillJoinHandle<()>>,
}

/// Routes frames between the uplink and all clients. Frames never go back to
/// the side they came from.
pub struct Reactor {
    tasks: DenseSlotMap<Task, TaskData>,
    sender: mpsc::Sender<ReactorMessage>,
    receive: mpsc::Receiver<ReactorMessage>,
}

impl Reactor {
    pub fn new() -> (Reactor, ReactorHandle) {
        let (tx, rx) = mpsc::channel(16);

        let reactor = Reactor {
            tasks: DenseSlotMap::with_key(),
            receive: rx,
            sender: tx.clone(),
        };
        (reactor, ReactorHandle { sender: tx })
    }

    /// Runs until the uplink goes away, which is always reported as
    /// [`Error::UplinkLost`](crate::Error::UplinkLost).
    pub async fn run(&mut self) -> crate::Result<()> {
        while let Some(message) = self.receive.next().await {
            match message {
                ReactorMessage::Register {
                    uplink,
                    read,
                    write,
                    task,
                } => {
                    let key = self.tasks.insert(TaskData {
                        uplink,
                        sink: write,
                        supervisor: None,
                        reader: None,
                    });
                    log::debug!("Registered {} {:?}", kind(uplink), key);

                    let shandle = task::spawn(supervise(task, self.sender.clone(), key));
                    let rhandle = task::spawn(read_task(read, self.sender.clone(), key));

                    if let Some(data) = self.tasks.get_mut(key) {
                        data.supervisor = Some(util::kill_task_on_drop(shandle));
                        data.reader = Some(util::kill_task_on_drop(rhandle));
                    }
                }
                ReactorMessage::TaskDied { task } => {
                    // dropping the data aborts the reader and closes the sink,
                    // which in turn ends the connection if it is still open
                    if let Some(data) = self.tasks.remove(task) {
                        log::debug!("{} {:?} went away", kind(data.uplink), task);
                        if data.uplink {
                            return Err(crate::Error::UplinkLost);
                        }
                    }
                }
                ReactorMessage::Frame { source, frame } => {
                    let from_uplink = match self.tasks.get(source) {
                        Some(task) => task.uplink,
                        // sender is gone already
                        None => continue,
                    };

                    let mut broken = vec![];
                    for (key, task) in &self.tasks {
                        if task.uplink != from_uplink && task.sink.unbounded_send(frame).is_err() {
                            broken.push(key);
                        }
                    }
                    for key in broken {
                        if let Some(data) = self.tasks.remove(key) {
                            if data.uplink {
                                return Err(crate::Error::UplinkLost);
                            }
                        }
                    }
                }
            }
        }
        Err(crate::Error::ReactorClosed)
    }
}

fn kind(uplink: bool) -> &'static str {
    if uplink {
        "uplink"
    } else {
        "client"
    }
}

async fn read_task(mut read: FrameStream, mut sender: mpsc::Sender<ReactorMessage>, key: Task) {
    while let Some(frame) = read.next().await {
        if sender
            .send(ReactorMessage::Frame { source: key, frame })
            .await
            .is_err()
        {
            break;
        }
    }
}

async fn supervise(task: JoinHandle<()>, mut sender: mpsc::Sender<ReactorMessage>, key: Task) {
    let task = util::kill_task_on_drop(task);
    let _ = task.await;
    let _ = sender.send(ReactorMessage::TaskDied { task: key }).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    struct Endpoint {
        to_reactor: mpsc::UnboundedSender<CanFrame>,
        from_reactor: mpsc::UnboundedReceiver<CanFrame>,
        alive: Option<tokio::sync::oneshot::Sender<()>>,
    }

    async fn attach(handle: &mut ReactorHandle, uplink: bool) -> Endpoint {
        let (to_reactor, read) = mpsc::unbounded();
        let (write, from_reactor) = mpsc::unbounded();
        let (alive, dead) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _ = dead.await;
        });

        if uplink {
            handle.register_uplink(read, write, task).await.unwrap();
        } else {
            handle.register_client(read, write, task).await.unwrap();
        }

        Endpoint {
            to_reactor,
            from_reactor,
            alive: Some(alive),
        }
    }

    async fn next(endpoint: &mut Endpoint) -> Option<CanFrame> {
        timeout(Duration::from_millis(200), endpoint.from_reactor.next())
            .await
            .ok()
            .flatten()
    }

    fn frame(id: u32) -> CanFrame {
        CanFrame::new(id, &[id as u8]).unwrap()
    }

    #[tokio::test]
    async fn uplink_frames_reach_every_client() {
        let (mut reactor, mut handle) = Reactor::new();
        tokio::spawn(async move { reactor.run().await });

        let mut uplink = attach(&mut handle, true).await;
        let mut a = attach(&mut handle, false).await;
        let mut b = attach(&mut handle, false).await;

        // a client frame proves both clients are registered by the time the
        // uplink sees it
        b.to_reactor.unbounded_send(frame(0x2)).unwrap();
        assert_eq!(next(&mut uplink).await, Some(frame(0x2)));
        assert_eq!(next(&mut a).await, None);

        uplink.to_reactor.unbounded_send(frame(0x1)).unwrap();
        assert_eq!(next(&mut a).await, Some(frame(0x1)));
        assert_eq!(next(&mut b).await, Some(frame(0x1)));
    }

    #[tokio::test]
    async fn finished_client_is_dropped() {
        let (mut reactor, mut handle) = Reactor::new();
        tokio::spawn(async move { reactor.run().await });

        let mut uplink = attach(&mut handle, true).await;
        let mut client = attach(&mut handle, false).await;

        client.to_reactor.unbounded_send(frame(0x3)).unwrap();
        assert_eq!(next(&mut uplink).await, Some(frame(0x3)));

        client.alive.take();
        // the reactor closes the client's sink once it notices
        assert_eq!(
            timeout(Duration::from_secs(1), client.from_reactor.next())
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn run_ends_when_uplink_dies() {
        let (mut reactor, mut handle) = Reactor::new();
        let _client = attach(&mut handle, false).await;
        let mut uplink = attach(&mut handle, true).await;
        drop(handle);

        uplink.alive.take();
        let res = timeout(Duration::from_secs(1), reactor.run()).await.unwrap();
        assert!(matches!(res, Err(crate::Error::UplinkLost)));
    }
}
