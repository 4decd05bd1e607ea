//! Transport seam between the consumer's state machine and the wire client.

use std::error::Error as StdError;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::broker::topology::{ExchangeSpec, QueueRoute};
use crate::observability::span::SpanRef;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("amqp: {0}")]
    Amqp(#[from] lapin::Error),
    #[error("broker transport: {0}")]
    Transport(String),
    #[error("broker is not connected")]
    NotConnected,
    #[error("broker consumer is closed")]
    Closed,
}

/// Asynchronous notification from a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection opened as `generation` went away.
    Closed { generation: u64, reason: String },
}

/// A message received from a queue.
#[derive(Debug, Clone, Default)]
pub struct Delivery {
    pub routing_key: String,
    pub payload: Vec<u8>,
    /// String-valued message headers, propagation headers included.
    pub headers: Vec<(String, String)>,
}

pub type HandlerResult = Result<(), Box<dyn StdError + Send + Sync>>;

/// Application callback for one route.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, parent: &SpanRef, delivery: Delivery) -> HandlerResult;
}

/// Opens connections. Each connection reports its own closure on `events`,
/// tagged with the generation it was opened as.
#[async_trait]
pub trait BrokerTransport: Send + Sync + 'static {
    async fn connect(
        &self,
        generation: u64,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Result<Box<dyn BrokerChannel>, BrokerError>;
}

/// One channel over one connection. Every declare must be safe to repeat.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<(), BrokerError>;

    async fn declare_queue(&self, route: &QueueRoute) -> Result<(), BrokerError>;

    async fn bind_queue(&self, exchange: &str, queue: &str, routing_key: &str) -> Result<(), BrokerError>;

    /// Start an auto-ack consumer. The stream ends when the channel goes away.
    async fn consume(&self, queue: &str) -> Result<BoxStream<'static, Delivery>, BrokerError>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        headers: &[(String, String)],
    ) -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}
