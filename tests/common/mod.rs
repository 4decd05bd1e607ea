//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};

use service_runtime::broker::{
    BrokerChannel, BrokerError, BrokerTransport, ConnectionEvent, Delivery, ExchangeSpec, HandlerResult,
    MessageHandler, QueueRoute,
};
use service_runtime::db::Connector;
use service_runtime::lifecycle::{Component, FatalError, StopError};
use service_runtime::observability::derive::MetricSample;
use service_runtime::observability::sinks::{MetricsSink, SinkError, TraceSink};
use service_runtime::observability::{Span, SpanRef};

/// Ordered record of lifecycle calls across components.
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Component whose behaviour in each phase is scripted.
pub struct ScriptedComponent {
    name: String,
    log: EventLog,
    pub fail_prepare: bool,
    pub fail_start: bool,
    pub fail_stop: bool,
    pub stop_delay: Option<Duration>,
    pub stop_timeout: Option<Duration>,
    stops: AtomicU32,
}

impl ScriptedComponent {
    pub fn new(name: &str, log: &EventLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            fail_prepare: false,
            fail_start: false,
            fail_stop: false,
            stop_delay: None,
            stop_timeout: None,
            stops: AtomicU32::new(0),
        }
    }

    pub fn failing_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn slow_stop(mut self, delay: Duration, timeout: Duration) -> Self {
        self.stop_delay = Some(delay);
        self.stop_timeout = Some(timeout);
        self
    }

    pub fn stop_count(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }

    fn record(&self, phase: &str) {
        self.log.lock().unwrap().push(format!("{}:{}", phase, self.name));
    }
}

#[async_trait]
impl Component for ScriptedComponent {
    async fn prepare(&self) -> Result<(), FatalError> {
        self.record("prepare");
        if self.fail_prepare {
            return Err(FatalError::Failed(format!("{} refused to prepare", self.name)));
        }
        Ok(())
    }

    async fn start(&self) -> Result<(), FatalError> {
        self.record("start");
        if self.fail_start {
            return Err(FatalError::Failed(format!("{} refused to start", self.name)));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), StopError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.record("stop");
        if let Some(delay) = self.stop_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_stop {
            return Err(StopError::Failed(format!("{} refused to stop", self.name)));
        }
        Ok(())
    }

    fn stop_timeout(&self) -> Option<Duration> {
        self.stop_timeout
    }
}

/// Trace sink that keeps every batch it receives.
#[derive(Default)]
pub struct CaptureTraceSink {
    pub batches: Mutex<Vec<Vec<Span>>>,
    pub fail: AtomicBool,
}

impl CaptureTraceSink {
    pub fn spans(&self) -> Vec<Span> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl TraceSink for CaptureTraceSink {
    fn name(&self) -> &'static str {
        "capture-trace"
    }

    async fn send(&self, spans: &[Span]) -> Result<(), SinkError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected(503));
        }
        self.batches.lock().unwrap().push(spans.to_vec());
        Ok(())
    }
}

/// Trace sink whose next send parks until released once `hold` is set.
#[derive(Default)]
pub struct GatedTraceSink {
    pub hold: AtomicBool,
    pub entered: Notify,
    pub release: Notify,
    pub batches: Mutex<Vec<Vec<String>>>,
}

impl GatedTraceSink {
    pub fn names(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl TraceSink for GatedTraceSink {
    fn name(&self) -> &'static str {
        "gated-trace"
    }

    async fn send(&self, spans: &[Span]) -> Result<(), SinkError> {
        if self.hold.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.batches
            .lock()
            .unwrap()
            .push(spans.iter().map(|s| s.name.clone()).collect());
        Ok(())
    }
}

/// Metrics sink that keeps every line it receives.
#[derive(Default)]
pub struct CaptureMetricsSink {
    pub lines: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

impl CaptureMetricsSink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricsSink for CaptureMetricsSink {
    fn name(&self) -> &'static str {
        "capture-metrics"
    }

    async fn send(&self, samples: &[MetricSample]) -> Result<(), SinkError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SinkError::Io(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused")));
        }
        self.lines.lock().unwrap().extend(samples.iter().map(MetricSample::to_line));
        Ok(())
    }
}

/// Counters shared between a [`FakeConnector`] and the test holding it.
#[derive(Default)]
pub struct ConnectorStats {
    pub failures_left: AtomicU32,
    pub attempts: AtomicU32,
    pub closed: AtomicU32,
}

/// Connector that fails a set number of times before handing out a pool.
pub struct FakeConnector(pub Arc<ConnectorStats>);

impl FakeConnector {
    pub fn failing(times: u32) -> (Self, Arc<ConnectorStats>) {
        let stats = Arc::new(ConnectorStats::default());
        stats.failures_left.store(times, Ordering::SeqCst);
        (Self(stats.clone()), stats)
    }
}

/// Stand-in pool handle.
pub struct FakePool;

#[async_trait]
impl Connector for FakeConnector {
    type Pool = FakePool;

    async fn connect(&self) -> Result<FakePool, sqlx::Error> {
        self.0.attempts.fetch_add(1, Ordering::SeqCst);
        let left = self.0.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.0.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(sqlx::Error::PoolTimedOut);
        }
        Ok(FakePool)
    }

    async fn close(&self, _pool: &FakePool) {
        self.0.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn describe(&self) -> String {
        "fake://db".to_string()
    }
}

/// In-memory broker. Records declarations, hands out delivery streams and
/// lets tests close connections.
#[derive(Default)]
pub struct FakeBroker {
    pub ops: Mutex<Vec<String>>,
    pub published: Mutex<Vec<(String, Vec<u8>, Vec<(String, String)>)>>,
    pub connect_failures: AtomicU32,
    pub connects: AtomicU32,
    events: Mutex<Option<mpsc::UnboundedSender<ConnectionEvent>>>,
    queues: Mutex<HashMap<String, mpsc::UnboundedSender<Delivery>>>,
    /// Delay applied to every declare, to widen the rebuild window.
    pub declare_delay: Mutex<Option<Duration>>,
}

impl FakeBroker {
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn count_ops(&self, prefix: &str) -> usize {
        self.ops().iter().filter(|op| op.starts_with(prefix)).count()
    }

    /// Report that connection `generation` closed.
    pub fn close_connection(&self, generation: u64) {
        let events = self.events.lock().unwrap().clone();
        if let Some(events) = events {
            let _ = events.send(ConnectionEvent::Closed {
                generation,
                reason: "connection reset".into(),
            });
        }
    }

    /// Push a delivery onto `queue`'s current consumer stream.
    pub fn deliver(&self, queue: &str, delivery: Delivery) -> bool {
        match self.queues.lock().unwrap().get(queue) {
            Some(tx) => tx.send(delivery).is_ok(),
            None => false,
        }
    }

    fn record(&self, op: String) {
        self.ops.lock().unwrap().push(op);
    }

    async fn pause(&self) {
        let delay = *self.declare_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

pub struct FakeTransport(pub Arc<FakeBroker>);

#[async_trait]
impl BrokerTransport for FakeTransport {
    async fn connect(
        &self,
        generation: u64,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        let broker = &self.0;
        broker.connects.fetch_add(1, Ordering::SeqCst);
        let left = broker.connect_failures.load(Ordering::SeqCst);
        if left > 0 {
            broker.connect_failures.store(left - 1, Ordering::SeqCst);
            return Err(BrokerError::Transport("connection refused".into()));
        }
        broker.record(format!("connect:{}", generation));
        *broker.events.lock().unwrap() = Some(events);
        Ok(Box::new(FakeChannel(broker.clone())))
    }
}

struct FakeChannel(Arc<FakeBroker>);

#[async_trait]
impl BrokerChannel for FakeChannel {
    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<(), BrokerError> {
        self.0.pause().await;
        self.0.record(format!("exchange:{}", exchange.name));
        Ok(())
    }

    async fn declare_queue(&self, route: &QueueRoute) -> Result<(), BrokerError> {
        self.0.record(format!("queue:{}", route.queue));
        Ok(())
    }

    async fn bind_queue(&self, exchange: &str, queue: &str, routing_key: &str) -> Result<(), BrokerError> {
        self.0.record(format!("bind:{}:{}:{}", exchange, queue, routing_key));
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<BoxStream<'static, Delivery>, BrokerError> {
        self.0.record(format!("consume:{}", queue));
        let (tx, rx) = mpsc::unbounded_channel();
        self.0.queues.lock().unwrap().insert(queue.to_string(), tx);
        Ok(stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|d| (d, rx)) }).boxed())
    }

    async fn publish(
        &self,
        _exchange: &str,
        routing_key: &str,
        payload: &[u8],
        headers: &[(String, String)],
    ) -> Result<(), BrokerError> {
        self.0
            .published
            .lock()
            .unwrap()
            .push((routing_key.to_string(), payload.to_vec(), headers.to_vec()));
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.0.record("close".into());
        Ok(())
    }
}

/// Handler that forwards every delivery (and the span it ran under) to a channel.
pub struct ForwardingHandler {
    pub tx: mpsc::UnboundedSender<(Delivery, SpanRef)>,
    pub fail: bool,
}

#[async_trait]
impl MessageHandler for ForwardingHandler {
    async fn handle(&self, parent: &SpanRef, delivery: Delivery) -> HandlerResult {
        let _ = self.tx.send((delivery, parent.clone()));
        if self.fail {
            return Err("handler rejected message".into());
        }
        Ok(())
    }
}

/// Bind an ephemeral port and return it free for a server to take.
pub async fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Minimal HTTP backend answering every request with `status` and `body`.
/// Each raw request head is sent to the returned receiver.
pub async fn start_recording_backend(
    status: u16,
    body: &'static str,
) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let mut buf = vec![0u8; 8192];
                        let n = socket.read(&mut buf).await.unwrap_or(0);
                        let _ = tx.send(String::from_utf8_lossy(&buf[..n]).into_owned());
                        let status_text = match status {
                            200 => "200 OK",
                            202 => "202 Accepted",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, rx)
}
