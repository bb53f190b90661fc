use futures::Future;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::{JoinError, JoinHandle};

/// Awaits `future` and logs its error instead of returning it.
pub async fn catch_error<Fut, E>(future: Fut)
where
    Fut: Future<Output = Result<(), E>>,
    E: fmt::Display + fmt::Debug,
{
    match future.await {
        Ok(()) => {}
        Err(e) => {
            log::error!("{}", e);
            log::debug!("Details: {:?}", e)
        }
    }
}

/// A `JoinHandle` that aborts its task when dropped.
pub struct KillJoinHandle<T> {
    handle: JoinHandle<T>,
}

impl<T> Drop for KillJoinHandle<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl<T> Future for KillJoinHandle<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx)
    }
}

pub fn kill_task_on_drop<T>(handle: JoinHandle<T>) -> KillJoinHandle<T> {
    KillJoinHandle { handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn dropping_handle_aborts_task() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _tx = tx;
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        drop(kill_task_on_drop(handle));
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn awaiting_handle_yields_output() {
        let handle = kill_task_on_drop(tokio::spawn(async { 42 }));
        assert_eq!(handle.await.unwrap(), 42);
    }
}
