//! Bus listeners tying the payment lifecycle together:
//!
//! - a created attempt schedules its reconcile task,
//! - a completed attempt completes its parent payment,
//! - a ledger push notification for a reference re-schedules a reconcile.
//!
//! All listeners are idempotent; duplicate events collapse at the queue
//! dedup layer or in the state machine.

use std::sync::Arc;

use crate::error::Error;
use crate::events::{EventName, EventPayload, Listener};
use crate::jobs::Enqueuer;
use crate::payments::{AttemptStatus, PaymentService, PaymentStatus};

/// Reacts to `attempt.updated`: a terminal attempt drives the parent
/// payment. Completion completes the payment; a failed attempt leaves the
/// payment `pending` so another attempt may still succeed, and expiry is
/// owned by the payment sweep.
pub fn attempt_status_listener(service: Arc<dyn PaymentService>) -> Listener {
    Arc::new(move |_name, payload| {
        let service = Arc::clone(&service);
        Box::pin(async move {
            let EventPayload::AttemptUpdated {
                payment_id, status, ..
            } = payload
            else {
                return Ok(());
            };
            if status != AttemptStatus::Completed {
                return Ok(());
            }
            match service
                .update_payment_status(payment_id, PaymentStatus::Completed)
                .await
            {
                Ok(()) | Err(Error::Conflict(_)) => Ok(()),
                Err(err) => Err(err),
            }
        })
    })
}

/// Reacts to `attempt.created`: schedules the reconcile task for the new
/// reference.
pub fn attempt_created_listener(enqueuer: Arc<Enqueuer>) -> Listener {
    Arc::new(move |_name, payload| {
        let enqueuer = Arc::clone(&enqueuer);
        Box::pin(async move {
            let EventPayload::AttemptCreated { reference, .. } = payload else {
                return Ok(());
            };
            enqueuer.reconcile_by_reference(&reference).await
        })
    })
}

/// Reacts to `attempt.reference_notification` from the ledger push
/// channel: re-schedules a reconcile; the dedup key drops it when one is
/// already live.
pub fn reference_notification_listener(enqueuer: Arc<Enqueuer>) -> Listener {
    Arc::new(move |name, payload| {
        let enqueuer = Arc::clone(&enqueuer);
        Box::pin(async move {
            if name != EventName::AttemptReferenceNotification {
                return Ok(());
            }
            let EventPayload::Reference { reference } = payload else {
                return Ok(());
            };
            enqueuer.reconcile_by_reference(&reference).await
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Emitter;
    use crate::jobs::mem::MemJobQueue;
    use crate::jobs::TASK_RECONCILE_BY_REFERENCE;
    use crate::payments::{Attempt, AttemptStatus};
    use uuid::Uuid;

    fn attempt(payment_id: Uuid, status: AttemptStatus) -> Attempt {
        Attempt {
            id: Uuid::new_v4(),
            payment_id,
            reference: "ref".into(),
            source_wallet: "wallet".into(),
            source_mint: "mint".into(),
            destination_wallet: "merchant".into(),
            destination_mint: "mint".into(),
            amount: 10,
            discount_amount: 0,
            total_amount: 10,
            accrued_bonus_amount: 0,
            message: None,
            memo: None,
            apply_bonus: false,
            tx_signature: None,
            status,
        }
    }

    #[tokio::test]
    async fn created_attempt_enqueues_one_reconcile() {
        let emitter = Emitter::new();
        let queue = Arc::new(MemJobQueue::new());
        let enqueuer = Arc::new(Enqueuer::new(queue.clone()));
        emitter.on(
            EventName::AttemptCreated,
            attempt_created_listener(enqueuer),
        );

        let payload = EventPayload::AttemptCreated {
            payment_id: Uuid::new_v4(),
            attempt_id: Uuid::new_v4(),
            reference: "4fYNw3dojWmQ4dXtSGE9epjRGy9pFSx62YypT7avPYvA".into(),
        };
        emitter.emit(EventName::AttemptCreated, &payload);
        emitter.emit(EventName::AttemptCreated, &payload);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // the second enqueue collapses on the dedup key
        assert_eq!(queue.tasks_of_kind(TASK_RECONCILE_BY_REFERENCE).len(), 1);
    }

    #[tokio::test]
    async fn non_completed_updates_do_not_touch_the_payment() {
        use crate::payments::PaymentService;
        use crate::payments::Service;
        use crate::payments::{NewPayment, PaymentConfig};
        use crate::repository::mem::MemRepository;
        use checkout_svm::testing::{MemoryLedger, MemorySwap};

        let service: Arc<dyn PaymentService> = Arc::new(
            Service::new(
                Arc::new(MemRepository::new()),
                Arc::new(MemoryLedger::new()),
                Arc::new(MemorySwap::new()),
                PaymentConfig {
                    apply_bonus: false,
                    bonus_mint: String::new(),
                    bonus_authority: None,
                    max_apply_bonus_amount: 0,
                    max_apply_bonus_percent: 0,
                    accrue_bonus: false,
                    accrue_bonus_rate: 0,
                    destination_wallet: "merchant".into(),
                    destination_mint: "SOL".into(),
                    payment_ttl: std::time::Duration::from_secs(900),
                    pay_base_url: "https://pay.example.com".into(),
                },
            )
            .unwrap(),
        );
        let payment = service
            .create_payment(NewPayment {
                amount: 10,
                ..NewPayment::default()
            })
            .await
            .unwrap();

        let listener = attempt_status_listener(Arc::clone(&service));
        let failed = attempt(payment.id, AttemptStatus::Failed);
        listener(
            EventName::AttemptUpdated,
            EventPayload::AttemptUpdated {
                payment_id: payment.id,
                reference: failed.reference.clone(),
                status: failed.status,
                signature: None,
                attempt: failed,
            },
        )
        .await
        .unwrap();
        // failed attempts do not fail the payment
        assert_eq!(
            service.get_payment(payment.id).await.unwrap().status,
            crate::payments::PaymentStatus::New
        );

        let completed = attempt(payment.id, AttemptStatus::Completed);
        listener(
            EventName::AttemptUpdated,
            EventPayload::AttemptUpdated {
                payment_id: payment.id,
                reference: completed.reference.clone(),
                status: completed.status,
                signature: Some("sig".into()),
                attempt: completed,
            },
        )
        .await
        .unwrap();
        assert_eq!(
            service.get_payment(payment.id).await.unwrap().status,
            crate::payments::PaymentStatus::Completed
        );
    }
}
