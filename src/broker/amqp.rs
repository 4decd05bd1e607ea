//! AMQP 0-9-1 transport over lapin.

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::mpsc;

use crate::broker::topology::{ExchangeSpec, QueueRoute};
use crate::broker::transport::{BrokerChannel, BrokerError, BrokerTransport, ConnectionEvent, Delivery};

const CLOSE_REPLY_CODE: u16 = 200;

pub struct AmqpTransport {
    uri: String,
}

impl AmqpTransport {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

#[async_trait]
impl BrokerTransport for AmqpTransport {
    async fn connect(
        &self,
        generation: u64,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        let connection = Connection::connect(&self.uri, ConnectionProperties::default()).await?;
        connection.on_error(move |err| {
            let _ = events.send(ConnectionEvent::Closed {
                generation,
                reason: err.to_string(),
            });
        });
        let channel = connection.create_channel().await?;
        Ok(Box::new(AmqpChannel { connection, channel }))
    }
}

struct AmqpChannel {
    connection: Connection,
    channel: Channel,
}

fn header_string(value: &AMQPValue) -> Option<String> {
    match value {
        AMQPValue::LongString(s) => Some(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        AMQPValue::ShortString(s) => Some(s.as_str().to_string()),
        _ => None,
    }
}

fn to_delivery(delivery: lapin::message::Delivery) -> Delivery {
    let headers = delivery
        .properties
        .headers()
        .as_ref()
        .map(|table| {
            table
                .inner()
                .iter()
                .filter_map(|(k, v)| header_string(v).map(|v| (k.as_str().to_string(), v)))
                .collect()
        })
        .unwrap_or_default();
    Delivery {
        routing_key: delivery.routing_key.as_str().to_string(),
        payload: delivery.data,
        headers,
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<(), BrokerError> {
        let options = ExchangeDeclareOptions {
            durable: exchange.durable,
            ..Default::default()
        };
        self.channel
            .exchange_declare(&exchange.name, ExchangeKind::Topic, options, FieldTable::default())
            .await?;
        Ok(())
    }

    async fn declare_queue(&self, route: &QueueRoute) -> Result<(), BrokerError> {
        let options = QueueDeclareOptions {
            durable: route.durable,
            ..Default::default()
        };
        self.channel
            .queue_declare(&route.queue, options, FieldTable::default())
            .await?;
        Ok(())
    }

    async fn bind_queue(&self, exchange: &str, queue: &str, routing_key: &str) -> Result<(), BrokerError> {
        self.channel
            .queue_bind(queue, exchange, routing_key, QueueBindOptions::default(), FieldTable::default())
            .await?;
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<BoxStream<'static, Delivery>, BrokerError> {
        let tag = format!("{}-{}", queue, uuid::Uuid::new_v4());
        let options = BasicConsumeOptions {
            no_ack: true,
            ..Default::default()
        };
        let consumer = self
            .channel
            .basic_consume(queue, &tag, options, FieldTable::default())
            .await?;
        let queue = queue.to_string();
        let stream = consumer.filter_map(move |item| {
            let queue = queue.clone();
            async move {
                match item {
                    Ok(delivery) => Some(to_delivery(delivery)),
                    Err(e) => {
                        tracing::warn!(queue = %queue, error = %e, "Consumer stream error");
                        None
                    }
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        headers: &[(String, String)],
    ) -> Result<(), BrokerError> {
        let mut table = FieldTable::default();
        for (key, value) in headers {
            table.insert(
                ShortString::from(key.clone()),
                AMQPValue::LongString(LongString::from(value.clone())),
            );
        }
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_headers(table),
            )
            .await?
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.channel.close(CLOSE_REPLY_CODE, "Consumer stopping").await?;
        self.connection.close(CLOSE_REPLY_CODE, "Consumer stopping").await?;
        Ok(())
    }
}
