//! Per-conversation serialization of delivery work.
//!
//! Each conversation key gets a lane: a task draining an unbounded queue of
//! jobs one at a time. Jobs for the same key therefore complete in dispatch
//! order, while different keys proceed in parallel. A lane that stays idle
//! for the configured period removes itself.

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

type Job = BoxFuture<'static, ()>;
type LaneMap = HashMap<String, mpsc::UnboundedSender<Job>>;

#[derive(Clone)]
pub struct KeyedSerializer {
    lanes: Arc<Mutex<LaneMap>>,
    idle: Duration,
}

impl KeyedSerializer {
    pub fn new(idle: Duration) -> Self {
        Self {
            lanes: Arc::new(Mutex::new(HashMap::new())),
            idle,
        }
    }

    /// Queues `job` behind every job previously dispatched for `key`.
    pub fn dispatch<F>(&self, key: &str, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut job: Job = Box::pin(job);
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(tx) = lanes.get(key) {
            match tx.send(job) {
                Ok(()) => return,
                // The lane task died (a job panicked); start a fresh one.
                Err(mpsc::error::SendError(returned)) => {
                    tracing::warn!(key = %key, "delivery lane closed unexpectedly, restarting");
                    job = returned;
                    lanes.remove(key);
                }
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        // A fresh receiver is alive, so this cannot fail.
        let _ = tx.send(job);
        lanes.insert(key.to_string(), tx);
        tokio::spawn(run_lane(
            key.to_string(),
            rx,
            Arc::clone(&self.lanes),
            self.idle,
        ));
    }

    /// Number of live lanes.
    pub fn lanes(&self) -> usize {
        self.lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

async fn run_lane(
    key: String,
    mut rx: mpsc::UnboundedReceiver<Job>,
    lanes: Arc<Mutex<LaneMap>>,
    idle: Duration,
) {
    loop {
        match tokio::time::timeout(idle, rx.recv()).await {
            Ok(Some(job)) => job.await,
            Ok(None) => break,
            Err(_) => {
                // Holding the map lock means no dispatch can slip a job in
                // between the emptiness check and the removal.
                let pending = {
                    let mut map = lanes.lock().unwrap_or_else(PoisonError::into_inner);
                    match rx.try_recv() {
                        Ok(job) => Some(job),
                        Err(_) => {
                            map.remove(&key);
                            None
                        }
                    }
                };
                match pending {
                    Some(job) => job.await,
                    None => {
                        tracing::debug!(key = %key, "retiring idle delivery lane");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn same_key_runs_in_dispatch_order() {
        let serializer = KeyedSerializer::new(Duration::from_secs(60));
        let log = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = oneshot::channel();

        for i in 0..5u64 {
            let log = Arc::clone(&log);
            serializer.dispatch("jane-doe", async move {
                // Earlier jobs sleep longer; order must still hold.
                tokio::time::sleep(Duration::from_millis(25 - i * 5)).await;
                log.lock().unwrap().push(i);
            });
        }
        serializer.dispatch("jane-doe", async move {
            let _ = done_tx.send(());
        });

        done_rx.await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn different_keys_do_not_block_each_other() {
        let serializer = KeyedSerializer::new(Duration::from_secs(60));
        let (gate_tx, gate_rx) = oneshot::channel::<()>();
        let (other_tx, other_rx) = oneshot::channel();

        serializer.dispatch("slow", async move {
            let _ = gate_rx.await;
        });
        serializer.dispatch("fast", async move {
            let _ = other_tx.send(());
        });

        tokio::time::timeout(Duration::from_secs(1), other_rx)
            .await
            .expect("fast lane was blocked")
            .unwrap();
        assert_eq!(serializer.lanes(), 2);
        let _ = gate_tx.send(());
    }

    #[tokio::test]
    async fn idle_lanes_retire_and_restart() {
        let serializer = KeyedSerializer::new(Duration::from_millis(20));
        let (tx, rx) = oneshot::channel();
        serializer.dispatch("k", async move {
            let _ = tx.send(());
        });
        rx.await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(serializer.lanes(), 0);

        let (tx, rx) = oneshot::channel();
        serializer.dispatch("k", async move {
            let _ = tx.send(());
        });
        rx.await.unwrap();
    }
}
