//! Payment lifecycle engine of the checkout service.
//!
//! A merchant creates a payment intent; the buyer's wallet follows a deep
//! link and receives a pre-built, partially signed transaction; an
//! asynchronous reconciler watches the ledger for the embedded reference
//! key and drives the payment to a terminal state, fanning out events to
//! websocket subscribers and merchant webhooks.
//!
//! - [`payments`] — entities, the state machine service and its decorator
//!   pipeline, the attempt transaction builder, bus listeners and the
//!   background workers.
//! - [`events`] — the in-process event bus.
//! - [`jobs`] — the durable job queue, handler mux and scheduler.
//! - [`webhook`] — outbound webhook signing and delivery.
//! - [`repository`] — persistence behind the [`repository::PaymentRepository`]
//!   trait.

pub mod error;
pub mod events;
pub mod jobs;
pub mod payments;
pub mod repository;
pub mod webhook;

pub use error::Error;
pub use events::{Emitter, EventName, EventPayload, Listener};
pub use payments::{
    Attempt, AttemptDraft, AttemptStatus, BuiltAttempt, NewPayment, Payment, PaymentConfig,
    PaymentService, PaymentStatus, Service, ServiceEvents, ServiceTrace,
};
