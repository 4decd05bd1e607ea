//! Exchange, queue and binding layout declared on every connect.

use crate::config::BrokerConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub durable: bool,
}

/// One consumed queue and the handler it dispatches to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRoute {
    pub handler: String,
    pub queue: String,
    pub durable: bool,
}

impl QueueRoute {
    /// Queues are bound to the exchange under their own name.
    pub fn routing_key(&self) -> &str {
        &self.queue
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: ExchangeSpec,
    pub routes: Vec<QueueRoute>,
}

impl Topology {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            exchange: ExchangeSpec {
                name: config.exchange_name.clone(),
                durable: config.exchange_durable,
            },
            routes: config
                .routes
                .iter()
                .map(|route| QueueRoute {
                    handler: route.name.clone(),
                    queue: route.queue.clone(),
                    durable: config.queue_durable,
                })
                .collect(),
        }
    }
}
