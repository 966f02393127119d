//! In-process event bus: named events fan out to registered listeners,
//! each invocation running in its own task.
//!
//! Listeners must be idempotent; a failing listener is logged and never
//! blocks its siblings. No ordering is guaranteed across listeners.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use uuid::Uuid;

use crate::error::Error;
use crate::payments::{Attempt, AttemptStatus, PaymentStatus};

/// Named events emitted by the payment core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    /// A payment was created.
    PaymentCreated,
    /// A payment moved from `new` to `pending`.
    PaymentProcessing,
    /// A payment was canceled.
    PaymentCancelled,
    /// A payment failed.
    PaymentFailed,
    /// A payment expired.
    PaymentExpired,
    /// A payment completed.
    PaymentSucceeded,
    /// A deep link was generated for a payment.
    PaymentLinkGenerated,
    /// An attempt was built and persisted.
    AttemptCreated,
    /// An attempt's status or signature changed.
    AttemptUpdated,
    /// A ledger push notification arrived for a reference key.
    AttemptReferenceNotification,
}

impl EventName {
    /// Every event name, for listeners subscribing to the full stream.
    pub const ALL: &'static [Self] = &[
        Self::PaymentCreated,
        Self::PaymentProcessing,
        Self::PaymentCancelled,
        Self::PaymentFailed,
        Self::PaymentExpired,
        Self::PaymentSucceeded,
        Self::PaymentLinkGenerated,
        Self::AttemptCreated,
        Self::AttemptUpdated,
    ];

    /// Stable wire name of the event.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PaymentCreated => "payment.created",
            Self::PaymentProcessing => "payment.processing",
            Self::PaymentCancelled => "payment.cancelled",
            Self::PaymentFailed => "payment.failed",
            Self::PaymentExpired => "payment.expired",
            Self::PaymentSucceeded => "payment.succeeded",
            Self::PaymentLinkGenerated => "payment.link.generated",
            Self::AttemptCreated => "attempt.created",
            Self::AttemptUpdated => "attempt.updated",
            Self::AttemptReferenceNotification => "attempt.reference_notification",
        }
    }

    /// The event announcing a payment entering `status`.
    #[must_use]
    pub const fn for_payment_status(status: PaymentStatus) -> Self {
        match status {
            PaymentStatus::New => Self::PaymentCreated,
            PaymentStatus::Pending => Self::PaymentProcessing,
            PaymentStatus::Completed => Self::PaymentSucceeded,
            PaymentStatus::Failed => Self::PaymentFailed,
            PaymentStatus::Canceled => Self::PaymentCancelled,
            PaymentStatus::Expired => Self::PaymentExpired,
        }
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event payloads carried on the bus and serialized to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    /// A payment came into existence.
    PaymentCreated {
        /// The payment's id.
        payment_id: Uuid,
    },
    /// A payment changed status.
    PaymentStatus {
        /// The payment's id.
        payment_id: Uuid,
        /// The status entered.
        status: PaymentStatus,
    },
    /// A deep link was generated.
    LinkGenerated {
        /// The payment's id.
        payment_id: Uuid,
        /// The generated link.
        link: String,
    },
    /// An attempt was built.
    AttemptCreated {
        /// The parent payment's id.
        payment_id: Uuid,
        /// The attempt's id.
        attempt_id: Uuid,
        /// The attempt's reference key.
        reference: String,
    },
    /// An attempt changed.
    AttemptUpdated {
        /// The parent payment's id.
        payment_id: Uuid,
        /// The attempt's reference key.
        reference: String,
        /// The status entered.
        status: AttemptStatus,
        /// Ledger signature when known.
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
        /// Snapshot of the attempt.
        attempt: Attempt,
    },
    /// A ledger notification arrived for a reference key.
    Reference {
        /// The reference key.
        reference: String,
    },
}

impl EventPayload {
    /// The payment this payload belongs to, when it carries one.
    #[must_use]
    pub const fn payment_id(&self) -> Option<Uuid> {
        match self {
            Self::PaymentCreated { payment_id }
            | Self::PaymentStatus { payment_id, .. }
            | Self::LinkGenerated { payment_id, .. }
            | Self::AttemptCreated { payment_id, .. }
            | Self::AttemptUpdated { payment_id, .. } => Some(*payment_id),
            Self::Reference { .. } => None,
        }
    }
}

/// A listener invocation, run on its own task.
pub type ListenerFuture = Pin<Box<dyn Future<Output = Result<(), Error>> + Send>>;

/// A registered event listener.
pub type Listener = Arc<dyn Fn(EventName, EventPayload) -> ListenerFuture + Send + Sync>;

/// The bus. Cheap to share behind an [`Arc`].
#[derive(Default)]
pub struct Emitter {
    listeners: RwLock<HashMap<EventName, Vec<Listener>>>,
}

impl Emitter {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for one event name.
    pub fn on(&self, name: EventName, listener: Listener) {
        self.listeners
            .write()
            .expect("listener map poisoned")
            .entry(name)
            .or_default()
            .push(listener);
    }

    /// Registers one listener for several event names.
    pub fn listen_events(&self, listener: &Listener, names: &[EventName]) {
        let mut map = self.listeners.write().expect("listener map poisoned");
        for name in names {
            map.entry(*name).or_default().push(Arc::clone(listener));
        }
    }

    /// Fires an event: every listener registered for `name` is scheduled
    /// concurrently, fire-and-forget. Listener errors are logged.
    pub fn emit(&self, name: EventName, payload: &EventPayload) {
        let listeners = {
            let map = self.listeners.read().expect("listener map poisoned");
            map.get(&name).cloned().unwrap_or_default()
        };
        for listener in listeners {
            let future = listener(name, payload.clone());
            tokio::spawn(async move {
                if let Err(err) = future.await {
                    tracing::error!(event = %name, error = %err, "event listener failed");
                }
            });
        }
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .listeners
            .read()
            .map(|m| m.values().map(Vec::len).sum::<usize>())
            .unwrap_or(0);
        f.debug_struct("Emitter").field("listeners", &count).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_listener(counter: Arc<AtomicUsize>) -> Listener {
        Arc::new(move |_name, _payload| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn emit_reaches_every_registered_listener() {
        let emitter = Emitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        emitter.on(EventName::PaymentCreated, counting_listener(Arc::clone(&count)));
        emitter.on(EventName::PaymentCreated, counting_listener(Arc::clone(&count)));
        emitter.on(EventName::PaymentExpired, counting_listener(Arc::clone(&count)));

        emitter.emit(
            EventName::PaymentCreated,
            &EventPayload::PaymentCreated {
                payment_id: Uuid::new_v4(),
            },
        );
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_listener_does_not_block_siblings() {
        let emitter = Emitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let failing: Listener = Arc::new(|_, _| {
            Box::pin(async { Err(Error::Fatal("listener broke".into())) })
        });
        emitter.on(EventName::AttemptCreated, failing);
        emitter.on(EventName::AttemptCreated, counting_listener(Arc::clone(&count)));

        emitter.emit(
            EventName::AttemptCreated,
            &EventPayload::Reference {
                reference: "ref".into(),
            },
        );
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn listen_events_subscribes_to_each_name() {
        let emitter = Emitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let listener = counting_listener(Arc::clone(&count));
        emitter.listen_events(&listener, EventName::ALL);

        let payment_id = Uuid::new_v4();
        emitter.emit(EventName::PaymentCreated, &EventPayload::PaymentCreated { payment_id });
        emitter.emit(
            EventName::PaymentSucceeded,
            &EventPayload::PaymentStatus {
                payment_id,
                status: PaymentStatus::Completed,
            },
        );
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
