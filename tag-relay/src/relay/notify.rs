//! Value-change suppression and isolated fan-out to subscribers.

use crate::contract::{ComparableListener, TagValue};
use crate::error::RelayError;
use crate::observability::{events, fields};
use crate::relay::config::{EqualityFn, ErrorHook};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::{debug, warn};

const COMPONENT: &str = "relay_notify";

/// Stand-in for a cached value that has never been observed.
static ABSENT: TagValue = TagValue::Null;

pub(crate) struct Notifier {
    relay: String,
    equal: EqualityFn,
    on_error: ErrorHook,
}

impl Notifier {
    pub(crate) fn new(relay: &str, equal: EqualityFn, on_error: ErrorHook) -> Self {
        Self {
            relay: relay.to_string(),
            equal,
            on_error,
        }
    }

    /// An absent cache compares like a null value.
    pub(crate) fn is_unchanged(&self, value: &TagValue, cached: Option<&TagValue>) -> bool {
        (self.equal)(value, cached.unwrap_or(&ABSENT))
    }

    pub(crate) fn report(&self, err: &RelayError) {
        (self.on_error)(err);
    }

    /// Invokes every subscriber in order. A failing or panicking subscriber is
    /// reported and skipped; the rest still receive the value.
    pub(crate) async fn deliver(
        &self,
        id: &str,
        value: &TagValue,
        subscribers: Vec<ComparableListener>,
    ) {
        for subscriber in subscribers {
            let listener = subscriber.listener();
            let outcome = AssertUnwindSafe(listener.on_value(value.clone()))
                .catch_unwind()
                .await;
            let reason = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err.to_string(),
                Err(payload) => fields::format_panic(payload.as_ref()),
            };
            debug!(
                event = events::RELAY_NOTIFICATION_FAILED,
                component = COMPONENT,
                relay = %self.relay,
                id,
                reason = %reason,
                "subscriber failed to handle value"
            );
            self.report(&RelayError::Notification {
                id: id.to_string(),
                reason,
            });
        }
    }
}

pub(crate) fn default_error_hook(relay: &str) -> ErrorHook {
    let relay = relay.to_string();
    std::sync::Arc::new(move |err: &RelayError| {
        warn!(
            event = events::RELAY_ERROR_REPORTED,
            component = COMPONENT,
            relay = %relay,
            kind = ?err.kind(),
            err = %err,
            "relay error"
        );
    })
}

#[cfg(test)]
mod tests {
    use super::Notifier;
    use crate::contract::{listener_fn, ComparableListener, TagValue};
    use crate::error::{ListenerError, RelayError};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn collecting_notifier() -> (Notifier, Arc<Mutex<Vec<RelayError>>>) {
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();
        let notifier = Notifier::new(
            "test",
            Arc::new(|a: &TagValue, b: &TagValue| a == b),
            Arc::new(move |err: &RelayError| sink.lock().unwrap().push(err.clone())),
        );
        (notifier, reported)
    }

    #[test]
    fn absent_cache_equals_null() {
        let (notifier, _) = collecting_notifier();

        assert!(notifier.is_unchanged(&json!(null), None));
        assert!(!notifier.is_unchanged(&json!(0), None));
        assert!(notifier.is_unchanged(&json!(0), Some(&json!(0))));
    }

    #[tokio::test]
    async fn failing_and_panicking_subscribers_do_not_stop_delivery() {
        let (notifier, reported) = collecting_notifier();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();

        let subscribers = vec![
            ComparableListener::new(listener_fn(|_| Err(ListenerError::new("bad")))),
            ComparableListener::new(listener_fn(|_| panic!("worse"))),
            ComparableListener::new(listener_fn(move |value| {
                sink.lock().unwrap().push(value);
                Ok(())
            })),
        ];

        notifier.deliver("T1", &json!(42), subscribers).await;

        assert_eq!(*received.lock().unwrap(), vec![json!(42)]);
        let reported = reported.lock().unwrap();
        assert_eq!(reported.len(), 2);
        assert_eq!(
            reported[0],
            RelayError::Notification {
                id: "T1".to_string(),
                reason: "bad".to_string()
            }
        );
        assert_eq!(
            reported[1],
            RelayError::Notification {
                id: "T1".to_string(),
                reason: "worse".to_string()
            }
        );
    }
}
