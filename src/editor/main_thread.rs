//! Marshals handler execution onto the editor's single UI thread.
//!
//! The I/O side submits a closure and waits on a completion cell with a
//! deadline; the editor drains the queue from its per-frame tick. When the
//! tick fails to run the closure in time, the submitter gets the timeout
//! error and the late result is discarded by the dropped completion cell.

use parking_lot::Mutex;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::debug;

/// Error string returned when the frame tick misses the bounded wait.
pub const MAIN_THREAD_TIMEOUT_MESSAGE: &str =
    "Timed out waiting for command execution on main thread";

type JobFn = Box<dyn FnOnce() -> anyhow::Result<Value> + Send>;

struct Job {
    run: JobFn,
    complete: oneshot::Sender<anyhow::Result<Value>>,
}

/// Many-submitter, single-consumer queue drained by the editor frame tick.
pub struct MainThreadQueue {
    tx: mpsc::UnboundedSender<Job>,
    rx: Mutex<mpsc::UnboundedReceiver<Job>>,
    wait: Duration,
}

impl MainThreadQueue {
    pub fn new(wait: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            wait,
        }
    }

    /// Submit `job` and block the calling task until the frame tick ran it
    /// or the bounded wait expired.
    pub async fn run_on_main_thread<F>(&self, job: F) -> Result<Value, String>
    where
        F: FnOnce() -> anyhow::Result<Value> + Send + 'static,
    {
        let (complete, done) = oneshot::channel();
        if self
            .tx
            .send(Job {
                run: Box::new(job),
                complete,
            })
            .is_err()
        {
            return Err("main thread queue is shut down".to_string());
        }

        match timeout(self.wait, done).await {
            Ok(Ok(result)) => result.map_err(|err| err.to_string()),
            Ok(Err(_)) => Err("main thread queue is shut down".to_string()),
            Err(_) => {
                debug!("main thread barrier expired; result will be discarded");
                Err(MAIN_THREAD_TIMEOUT_MESSAGE.to_string())
            }
        }
    }

    /// Drain every queued job. Called from the editor's frame tick, on the
    /// UI thread only.
    pub fn pump(&self) {
        let mut rx = self.rx.lock();
        while let Ok(job) = rx.try_recv() {
            let result = (job.run)();
            // A send failure means the submitter timed out; the orphan
            // completion is swallowed here.
            let _ = job.complete.send(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn job_runs_when_pumped() {
        let queue = Arc::new(MainThreadQueue::new(Duration::from_secs(1)));

        let ticker = Arc::clone(&queue);
        let tick = tokio::spawn(async move {
            loop {
                ticker.pump();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let result = queue
            .run_on_main_thread(|| Ok(json!({"ran": true})))
            .await
            .unwrap();
        assert_eq!(result, json!({"ran": true}));
        tick.abort();
    }

    #[tokio::test]
    async fn missed_tick_times_out_with_fixed_message() {
        let queue = MainThreadQueue::new(Duration::from_millis(30));
        let err = queue
            .run_on_main_thread(|| Ok(json!({})))
            .await
            .unwrap_err();
        assert_eq!(err, MAIN_THREAD_TIMEOUT_MESSAGE);

        // The tick finally runs; the orphan result is swallowed.
        queue.pump();
    }

    #[tokio::test]
    async fn handler_error_is_propagated() {
        let queue = Arc::new(MainThreadQueue::new(Duration::from_secs(1)));
        let ticker = Arc::clone(&queue);
        let tick = tokio::spawn(async move {
            loop {
                ticker.pump();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let err = queue
            .run_on_main_thread(|| anyhow::bail!("menu item not found"))
            .await
            .unwrap_err();
        assert!(err.contains("menu item not found"));
        tick.abort();
    }
}
