//! Transactional outbox with a retrying publisher, a dead-letter boundary and
//! a retention sweeper.
//!
//! Business transactions enqueue [`models::NewOutboxEvent`]s through
//! [`producer::OutboxProducer`] in the same database transaction as their
//! domain change. [`publisher::OutboxPublisher`] later ships them to the
//! event bus as CloudEvents, retrying with exponential backoff until a
//! record is published or its retry budget runs out.

pub mod backoff;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod health;
pub mod metrics;
pub mod models;
pub mod producer;
pub mod publisher;
pub mod repos;
pub mod routes;
pub mod sweeper;
pub mod wire;

pub use backoff::{backoff, BackoffPolicy};
pub use error::{EnvelopeError, OutboxError};
pub use models::{EventType, FailureKind, NewOutboxEvent, OutboxRecord, OutboxStatus, StatusCounts, Transition};
pub use producer::{EnqueueOutcome, OutboxProducer};
pub use publisher::{run_publisher_task, OutboxPublisher, PublisherConfig};
pub use repos::{InMemoryOutboxStore, OutboxStore, PgOutboxStore};
pub use sweeper::{RetentionSweeper, SweeperConfig};
