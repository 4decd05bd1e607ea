//! Queue consumer component with an explicit reconnect state machine.
//!
//! # States
//! ```text
//! Disconnected ──start──▶ Reconnecting{1} ──ok──▶ Connected
//!                              │ ▲                    │
//!                         fail │ │ backoff     Closed event (current generation)
//!                              ▼ │                    │
//!                         Reconnecting{n+1} ◀─────────┘
//!
//! any state ──stop──▶ Closed
//! ```
//!
//! The link (channel plus consumer tasks) sits behind an async mutex that the
//! supervisor holds for a whole rebuild, so a concurrent `publish` waits for
//! the rebuild to finish instead of racing it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

use crate::broker::topology::{QueueRoute, Topology};
use crate::broker::transport::{BrokerChannel, BrokerError, BrokerTransport, ConnectionEvent, Delivery, MessageHandler};
use crate::config::BrokerConfig;
use crate::lifecycle::{Component, FatalError, Shutdown, StopError};
use crate::observability::context::TraceContext;
use crate::observability::metrics::BROKER_RECONNECTS_TOTAL;
use crate::observability::span::{SpanHandle, SpanKind, SpanRef};
use crate::observability::tags;
use crate::observability::tracer::Tracer;
use crate::resilience::backoff::ExponentialBackoff;

const REMOTE_SERVICE: &str = "amqp";

/// Connection state as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connected,
    Reconnecting { attempt: u32 },
    Closed,
}

struct Link {
    state: LinkState,
    generation: u64,
    channel: Option<Box<dyn BrokerChannel>>,
    consumers: Vec<JoinHandle<()>>,
}

impl Link {
    fn abort_consumers(&mut self) {
        for task in self.consumers.drain(..) {
            task.abort();
        }
    }
}

struct Inner {
    transport: Arc<dyn BrokerTransport>,
    topology: Topology,
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
    tracer: Option<Tracer>,
    backoff: ExponentialBackoff,
    link: Arc<Mutex<Link>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

/// Builder for [`QueueConsumer`].
pub struct QueueConsumerBuilder {
    transport: Arc<dyn BrokerTransport>,
    topology: Topology,
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
    tracer: Option<Tracer>,
    backoff: ExponentialBackoff,
}

impl QueueConsumerBuilder {
    /// Register the handler for routes whose handler name is `name`.
    pub fn handler(mut self, name: &str, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.insert(name.to_string(), handler);
        self
    }

    pub fn tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn build(self) -> QueueConsumer {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        QueueConsumer {
            inner: Arc::new(Inner {
                transport: self.transport,
                topology: self.topology,
                handlers: self.handlers,
                tracer: self.tracer,
                backoff: self.backoff,
                link: Arc::new(Mutex::new(Link {
                    state: LinkState::Disconnected,
                    generation: 0,
                    channel: None,
                    consumers: Vec::new(),
                })),
                events: events_tx,
            }),
            events: std::sync::Mutex::new(Some(events_rx)),
            stopping: Shutdown::new(),
            supervisor: std::sync::Mutex::new(None),
        }
    }
}

/// Broker consumer that stays connected for the life of the process.
pub struct QueueConsumer {
    inner: Arc<Inner>,
    events: std::sync::Mutex<Option<mpsc::UnboundedReceiver<ConnectionEvent>>>,
    stopping: Shutdown,
    supervisor: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl QueueConsumer {
    pub fn builder(transport: Arc<dyn BrokerTransport>, topology: Topology) -> QueueConsumerBuilder {
        QueueConsumerBuilder {
            transport,
            topology,
            handlers: HashMap::new(),
            tracer: None,
            backoff: ExponentialBackoff::new(Duration::from_millis(1500), 1.5, Duration::from_secs(30)),
        }
    }

    /// Backoff policy from the `[broker]` section.
    pub fn backoff_from_config(config: &BrokerConfig) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(config.backoff_initial_ms),
            config.backoff_multiplier,
            Duration::from_secs(config.backoff_max_secs),
        )
    }

    pub async fn state(&self) -> LinkState {
        self.inner.link.lock().await.state
    }

    /// Generation of the most recent connect attempt.
    pub async fn generation(&self) -> u64 {
        self.inner.link.lock().await.generation
    }

    /// Publish to the exchange, propagating the trace of `parent`.
    ///
    /// Waits for an in-progress rebuild to finish before sending.
    pub async fn publish(&self, parent: &SpanRef, routing_key: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let mut span = parent.child(SpanKind::Outbound, &format!("publish {}", routing_key));
        span.remote_endpoint(REMOTE_SERVICE);
        span.tag("amqp.routing_key", routing_key);
        let headers = span.context().map(TraceContext::to_pairs).unwrap_or_default();

        let link = self.inner.link.lock().await;
        let result = match (&link.state, &link.channel) {
            (LinkState::Connected, Some(channel)) => {
                channel
                    .publish(&self.inner.topology.exchange.name, routing_key, payload, &headers)
                    .await
            }
            (LinkState::Closed, _) => Err(BrokerError::Closed),
            _ => Err(BrokerError::NotConnected),
        };
        drop(link);

        if let Err(e) = &result {
            span.tag(tags::ERROR, "true");
            span.tag(tags::ERROR_MESSAGE, e.to_string());
        }
        result
    }
}

impl Inner {
    /// Connect and declare the full topology, retrying until it succeeds or
    /// `stopping` fires. Returns `false` if stopped first.
    async fn establish(&self, link: &mut OwnedMutexGuard<Link>, stopping: &Shutdown) -> bool {
        let mut backoff = self.backoff.clone();
        backoff.reset();
        let mut attempt = 0;

        // The previous connection is gone; its consumers have nothing left to read.
        link.abort_consumers();
        link.channel = None;

        loop {
            if stopping.is_triggered() {
                return false;
            }
            attempt += 1;
            link.generation += 1;
            link.state = LinkState::Reconnecting { attempt };
            let generation = link.generation;

            match self.open(generation).await {
                Ok((channel, consumers)) => {
                    link.channel = Some(channel);
                    link.consumers = consumers;
                    link.state = LinkState::Connected;
                    tracing::info!(
                        exchange = %self.topology.exchange.name,
                        queues = self.topology.routes.len(),
                        generation,
                        attempt,
                        "Broker connected, topology declared"
                    );
                    return true;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(attempt, delay = ?delay, error = %e, "Broker connect failed, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = stopping.wait() => return false,
                    }
                }
            }
        }
    }

    async fn open(&self, generation: u64) -> Result<(Box<dyn BrokerChannel>, Vec<JoinHandle<()>>), BrokerError> {
        let channel = self.transport.connect(generation, self.events.clone()).await?;
        match self.declare(channel.as_ref()).await {
            Ok(consumers) => Ok((channel, consumers)),
            Err(e) => {
                let _ = channel.close().await;
                Err(e)
            }
        }
    }

    async fn declare(&self, channel: &dyn BrokerChannel) -> Result<Vec<JoinHandle<()>>, BrokerError> {
        let exchange = &self.topology.exchange;
        channel.declare_exchange(exchange).await?;
        for route in &self.topology.routes {
            channel.declare_queue(route).await?;
            channel.bind_queue(&exchange.name, &route.queue, route.routing_key()).await?;
        }

        let mut consumers: Vec<JoinHandle<()>> = Vec::with_capacity(self.topology.routes.len());
        for route in &self.topology.routes {
            let Some(handler) = self.handlers.get(&route.handler) else {
                continue;
            };
            let deliveries = match channel.consume(&route.queue).await {
                Ok(deliveries) => deliveries,
                Err(e) => {
                    for task in consumers {
                        task.abort();
                    }
                    return Err(e);
                }
            };
            let dispatch = Dispatch {
                route: route.clone(),
                handler: handler.clone(),
                tracer: self.tracer.clone(),
            };
            consumers.push(tokio::spawn(dispatch.run(deliveries)));
            tracing::info!(consumer = %route.handler, queue = %route.queue, "Consumer started");
        }
        Ok(consumers)
    }

    async fn supervise(
        self: Arc<Self>,
        mut link: OwnedMutexGuard<Link>,
        mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
        stopping: Shutdown,
    ) {
        if !self.establish(&mut link, &stopping).await {
            return;
        }
        drop(link);

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(ConnectionEvent::Closed { generation, reason }) = event else {
                        return;
                    };
                    let mut link = self.link.clone().lock_owned().await;
                    if generation != link.generation || link.state == LinkState::Closed {
                        tracing::debug!(generation, current = link.generation, "Ignoring stale connection event");
                        continue;
                    }
                    tracing::warn!(generation, reason = %reason, "Broker connection closed, reconnecting");
                    if !self.establish(&mut link, &stopping).await {
                        return;
                    }
                    metrics::counter!(BROKER_RECONNECTS_TOTAL).increment(1);
                }
                _ = stopping.wait() => return,
            }
        }
    }
}

/// Feeds one queue's deliveries to its handler, one at a time.
struct Dispatch {
    route: QueueRoute,
    handler: Arc<dyn MessageHandler>,
    tracer: Option<Tracer>,
}

impl Dispatch {
    async fn run(self, mut deliveries: BoxStream<'static, Delivery>) {
        while let Some(delivery) = deliveries.next().await {
            self.handle(delivery).await;
        }
        tracing::debug!(queue = %self.route.queue, "Delivery stream ended");
    }

    async fn handle(&self, delivery: Delivery) {
        let name = format!("consume {}", self.route.queue);
        let mut span = match &self.tracer {
            Some(tracer) => match TraceContext::from_pairs(&delivery.headers) {
                Some(remote) => tracer.new_child(&remote, SpanKind::Inbound, &name),
                None => tracer.begin_span(SpanKind::Inbound, &name),
            },
            None => SpanHandle::noop(),
        };
        span.tag("amqp.queue", self.route.queue.as_str());
        span.tag("amqp.routing_key", delivery.routing_key.as_str());

        if let Err(e) = self.handler.handle(&span.scope(), delivery).await {
            tracing::error!(consumer = %self.route.handler, queue = %self.route.queue, error = %e, "Message handler failed");
            span.tag(tags::ERROR, "true");
            span.tag(tags::ERROR_MESSAGE, e.to_string());
        }
        span.finish();
    }
}

#[async_trait]
impl Component for QueueConsumer {
    async fn prepare(&self) -> Result<(), FatalError> {
        for route in &self.inner.topology.routes {
            if !self.inner.handlers.contains_key(&route.handler) {
                return Err(FatalError::Misconfigured(format!(
                    "queue '{}' routes to unknown handler '{}'",
                    route.queue, route.handler
                )));
            }
        }
        tracing::info!(
            exchange = %self.inner.topology.exchange.name,
            routes = self.inner.topology.routes.len(),
            "Queue consumer prepared"
        );
        Ok(())
    }

    /// Takes the link before returning, so any publish after `start` waits
    /// for the first connect. Connecting itself happens in the background.
    async fn start(&self) -> Result<(), FatalError> {
        let events = self
            .events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .ok_or_else(|| FatalError::Failed("queue consumer already started".into()))?;
        let link = self.inner.link.clone().lock_owned().await;
        let task = tokio::spawn(self.inner.clone().supervise(link, events, self.stopping.clone()));
        *self.supervisor.lock().unwrap_or_else(|p| p.into_inner()) = Some(task);
        Ok(())
    }

    async fn stop(&self) -> Result<(), StopError> {
        self.stopping.trigger();
        let task = self.supervisor.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(task) = task {
            let _ = task.await;
        }

        let mut link = self.inner.link.lock().await;
        link.state = LinkState::Closed;
        link.abort_consumers();
        if let Some(channel) = link.channel.take() {
            channel
                .close()
                .await
                .map_err(|e| StopError::Failed(format!("broker close failed: {}", e)))?;
        }
        tracing::info!("Queue consumer stopped");
        Ok(())
    }
}
