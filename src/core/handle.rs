//! Stop signalling for long-running stage loops.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Receiving side of a stop request, checked once per cycle or event
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
    /// Sender kept alive by signals that nobody can trigger
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

impl ShutdownSignal {
    /// A signal that never fires (for one-shot use)
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keepalive: Some(Arc::new(tx)),
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once a stop has been requested (or the handle dropped)
    pub async fn stopped(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleep for `duration`; returns true if a stop arrived first
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        let interrupted = tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.stopped() => true,
        };
        interrupted || self.is_stopped()
    }
}

/// Create a linked trigger/signal pair
pub fn shutdown_channel() -> (watch::Sender<bool>, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (
        tx,
        ShutdownSignal {
            rx,
            _keepalive: None,
        },
    )
}

/// Handle to control a spawned stage loop
pub struct StageHandle {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl StageHandle {
    /// Spawn `run` with a fresh shutdown signal
    pub fn spawn<F, Fut>(name: &'static str, run: F) -> Self
    where
        F: FnOnce(ShutdownSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, signal) = shutdown_channel();
        let task = tokio::spawn(run(signal));
        Self { name, stop_tx, task }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ask the loop to stop and wait for in-flight work to finish
    pub async fn stop(self) -> Result<()> {
        let _ = self.stop_tx.send(true);
        self.task.await?;
        tracing::info!("{} stopped", self.name);
        Ok(())
    }

    /// Wait for the loop to exit on its own
    pub async fn join(self) -> Result<()> {
        self.task.await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_stop_interrupts_sleep() {
        let cycles = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&cycles);

        let handle = StageHandle::spawn("test", move |mut signal| async move {
            loop {
                counter.fetch_add(1, Ordering::SeqCst);
                if signal.sleep(Duration::from_secs(3600)).await {
                    break;
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tokio::time::timeout(Duration::from_secs(5), handle.stop())
            .await
            .expect("stop should not wait for the full sleep")
            .unwrap();

        assert_eq!(cycles.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_never_signal() {
        let mut signal = ShutdownSignal::never();
        assert!(!signal.is_stopped());
        assert!(!signal.sleep(Duration::from_millis(10)).await);
    }
}
