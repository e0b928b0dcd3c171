//! Forwards relay writes upstream without making the caller wait for them.

use crate::contract::{DataAccess, TagValue};
use crate::error::RelayError;
use crate::observability::events;
use crate::relay::notify::Notifier;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

const COMPONENT: &str = "relay_write_worker";

struct WriteRequest {
    id: String,
    value: TagValue,
}

/// Owns the sending half of the write queue. Dropping it stops the worker.
pub(crate) struct WriteForwarder {
    sender: UnboundedSender<WriteRequest>,
}

impl WriteForwarder {
    /// Spawns the worker on the current Tokio runtime.
    pub(crate) fn spawn(
        relay: &str,
        upstream: Arc<dyn DataAccess>,
        notifier: Arc<Notifier>,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(Self::write_forwarding_loop(
            relay.to_string(),
            upstream,
            notifier,
            receiver,
        ));
        Self { sender }
    }

    pub(crate) fn enqueue(&self, id: &str, value: TagValue) -> Result<(), RelayError> {
        self.sender
            .send(WriteRequest {
                id: id.to_string(),
                value,
            })
            .map_err(|_| RelayError::WriteQueueClosed { id: id.to_string() })
    }

    async fn write_forwarding_loop(
        relay: String,
        upstream: Arc<dyn DataAccess>,
        notifier: Arc<Notifier>,
        mut receiver: UnboundedReceiver<WriteRequest>,
    ) {
        while let Some(request) = receiver.recv().await {
            if let Err(err) = upstream.write(&request.id, request.value).await {
                warn!(
                    event = events::RELAY_WRITE_FORWARD_FAILED,
                    component = COMPONENT,
                    relay = %relay,
                    id = %request.id,
                    err = %err,
                    "upstream rejected write"
                );
                notifier.report(&err);
            }
        }

        debug!(
            event = events::RELAY_WRITE_WORKER_STOPPED,
            component = COMPONENT,
            relay = %relay,
            "write queue closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::WriteForwarder;
    use crate::contract::{DataAccess, TagValue, ValueListener};
    use crate::error::RelayError;
    use crate::relay::notify::Notifier;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    struct ChannelBackend {
        writes: mpsc::UnboundedSender<(String, TagValue)>,
        reject: bool,
    }

    #[async_trait]
    impl DataAccess for ChannelBackend {
        async fn subscribe(
            &self,
            _id: &str,
            _listener: Arc<dyn ValueListener>,
        ) -> Result<(), RelayError> {
            Ok(())
        }

        async fn unsubscribe(
            &self,
            _id: &str,
            _listener: Arc<dyn ValueListener>,
        ) -> Result<(), RelayError> {
            Ok(())
        }

        async fn read(&self, id: &str) -> Result<TagValue, RelayError> {
            Err(RelayError::upstream(id, "not used in tests"))
        }

        async fn write(&self, id: &str, value: TagValue) -> Result<(), RelayError> {
            let _ = self.writes.send((id.to_string(), value));
            if self.reject {
                return Err(RelayError::upstream(id, "read-only"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn writes_reach_upstream_in_submission_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let backend = Arc::new(ChannelBackend {
            writes: tx,
            reject: false,
        });
        let notifier = Arc::new(Notifier::new(
            "w",
            Arc::new(|a: &TagValue, b: &TagValue| a == b),
            Arc::new(|_: &RelayError| {}),
        ));
        let worker = WriteForwarder::spawn("w", backend, notifier);

        worker.enqueue("T1", json!(1)).unwrap();
        worker.enqueue("T2", json!(2)).unwrap();
        worker.enqueue("T1", json!(3)).unwrap();

        assert_eq!(rx.recv().await, Some(("T1".to_string(), json!(1))));
        assert_eq!(rx.recv().await, Some(("T2".to_string(), json!(2))));
        assert_eq!(rx.recv().await, Some(("T1".to_string(), json!(3))));
    }

    #[tokio::test]
    async fn rejected_writes_go_to_error_hook() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let backend = Arc::new(ChannelBackend {
            writes: tx,
            reject: true,
        });
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();
        let notifier = Arc::new(Notifier::new(
            "w",
            Arc::new(|a: &TagValue, b: &TagValue| a == b),
            Arc::new(move |err: &RelayError| sink.lock().unwrap().push(err.clone())),
        ));
        let worker = WriteForwarder::spawn("w", backend, notifier);

        worker.enqueue("T1", json!(1)).unwrap();
        rx.recv().await.expect("write reached backend");
        // second write only starts once the first has been reported
        worker.enqueue("T1", json!(2)).unwrap();
        rx.recv().await.expect("second write reached backend");

        let reported = reported.lock().unwrap();
        assert_eq!(reported[0], RelayError::upstream("T1", "read-only"));
    }
}
