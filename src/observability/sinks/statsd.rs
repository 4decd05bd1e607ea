//! StatsD metrics sink over UDP.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::Mutex;

use crate::observability::derive::MetricSample;
use crate::observability::sinks::{MetricsSink, SinkError};

pub const DEFAULT_PORT: u16 = 8125;

/// Largest payload that fits a typical Ethernet MTU without fragmenting.
const MAX_DATAGRAM: usize = 1432;

/// Sends timer lines to a StatsD daemon.
///
/// The address is resolved on the first send and again after any failed
/// send, so an unreachable daemon only costs the batches sent meanwhile.
pub struct StatsdSink {
    host: String,
    port: u16,
    link: Mutex<Option<Link>>,
}

struct Link {
    socket: UdpSocket,
    target: SocketAddr,
}

impl StatsdSink {
    /// Sink for `host[:port]`; the port defaults to 8125. Only the syntax is
    /// checked here.
    pub fn new(addr: &str) -> io::Result<Self> {
        let (host, port) = parse_addr(addr)?;
        Ok(Self {
            host: host.to_string(),
            port,
            link: Mutex::new(None),
        })
    }

    /// Address datagrams currently go to, once resolved.
    pub async fn target(&self) -> Option<SocketAddr> {
        self.link.lock().await.as_ref().map(|link| link.target)
    }

    async fn open(&self) -> io::Result<Link> {
        let target = lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("cannot resolve {}", self.host)))?;

        let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(target).await?;

        tracing::info!(target = %target, "StatsD sink connected");
        Ok(Link { socket, target })
    }
}

/// Split `host[:port]`.
pub fn parse_addr(addr: &str) -> io::Result<(&str, u16)> {
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port
                .parse()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid port in {}: {}", addr, e)))?;
            Ok((host.trim_start_matches('[').trim_end_matches(']'), port))
        }
        _ if !addr.is_empty() => Ok((addr, DEFAULT_PORT)),
        _ => Err(io::Error::new(io::ErrorKind::InvalidInput, "empty statsd address")),
    }
}

/// Join lines with `\n` into datagrams no larger than `max` bytes.
/// A single line longer than `max` is sent on its own.
pub fn pack_lines(lines: &[String], max: usize) -> Vec<String> {
    let mut packets = Vec::new();
    let mut current = String::new();
    for line in lines {
        if !current.is_empty() && current.len() + 1 + line.len() > max {
            packets.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        packets.push(current);
    }
    packets
}

#[async_trait]
impl MetricsSink for StatsdSink {
    fn name(&self) -> &'static str {
        "statsd"
    }

    async fn send(&self, samples: &[MetricSample]) -> Result<(), SinkError> {
        let mut guard = self.link.lock().await;
        let link = match guard.take() {
            Some(link) => link,
            None => self.open().await?,
        };
        let lines: Vec<String> = samples.iter().map(MetricSample::to_line).collect();
        for packet in pack_lines(&lines, MAX_DATAGRAM) {
            // Dropping the link makes the next batch resolve again.
            link.socket.send(packet.as_bytes()).await?;
        }
        *guard = Some(link);
        Ok(())
    }
}
