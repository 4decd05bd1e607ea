//! Message broker subsystem.
//!
//! # Data Flow
//! ```text
//! start → consumer.rs supervisor task
//!     → transport.connect(generation) (amqp.rs over lapin)
//!     → declare exchange → declare + bind each queue → consume each queue
//!     → deliveries → MessageHandler inside an inbound span
//!
//! connection closed (generation n)
//!     → n is current: rebuild under the link lock, backoff between attempts
//!     → n is stale: ignored
//! ```
//!
//! # Design Decisions
//! - A broker lost while serving is retried forever; it never takes the process down
//! - Every declare is idempotent, so a rebuild repeats the whole topology
//! - The wire client sits behind `BrokerTransport` so the state machine is testable

pub mod amqp;
pub mod consumer;
pub mod topology;
pub mod transport;

pub use amqp::AmqpTransport;
pub use consumer::{LinkState, QueueConsumer, QueueConsumerBuilder};
pub use topology::{ExchangeSpec, QueueRoute, Topology};
pub use transport::{BrokerChannel, BrokerError, BrokerTransport, ConnectionEvent, Delivery, HandlerResult, MessageHandler};
