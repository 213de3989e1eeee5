// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! AMQP transport backed by lapin.

use crate::error::BrokerError;
use crate::transport::{Connection, Delivery, ExchangeKind, Producer, Subscription, Transport};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions, QueueDeleteOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, ConnectionProperties};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Transport over AMQP 0.9.1.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmqpTransport;

#[async_trait]
impl Transport for AmqpTransport {
    async fn connect(&self, url: &str) -> Result<Arc<dyn Connection>, BrokerError> {
        let conn = lapin::Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = conn.create_channel().await?;
        debug!(url, "amqp connection established");
        Ok(Arc::new(AmqpConnection { conn, channel }))
    }
}

#[derive(Debug)]
struct AmqpConnection {
    conn: lapin::Connection,
    /// Channel used for declares and consumes on this connection.
    channel: Channel,
}

fn amqp_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
    }
}

#[async_trait]
impl Connection for AmqpConnection {
    fn is_open(&self) -> bool {
        self.conn.status().connected()
    }

    async fn producer(&self) -> Result<Box<dyn Producer>, BrokerError> {
        let channel = self.conn.create_channel().await?;
        Ok(Box::new(AmqpProducer { channel }))
    }

    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), BrokerError> {
        self.channel
            .exchange_declare(
                name,
                amqp_kind(kind),
                ExchangeDeclareOptions { durable: false, auto_delete: false, ..Default::default() },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn declare_queue(&self, queue: &str, exclusive: bool) -> Result<(), BrokerError> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions { exclusive, auto_delete: exclusive, ..Default::default() },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.channel
            .queue_bind(queue, exchange, routing_key, QueueBindOptions::default(), FieldTable::default())
            .await?;
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Subscription, BrokerError> {
        let tag = format!("drover-{}", drover_core::uuid());
        let mut consumer = self
            .channel
            .basic_consume(
                queue,
                &tag,
                BasicConsumeOptions { no_ack: true, ..Default::default() },
                FieldTable::default(),
            )
            .await?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                let Ok(delivery) = delivery else { break };
                let message = Delivery {
                    exchange: delivery.exchange.to_string(),
                    routing_key: delivery.routing_key.to_string(),
                    payload: delivery.data,
                };
                if tx.send(message).is_err() {
                    break;
                }
            }
        });
        Ok(Subscription::new(rx))
    }

    async fn delete_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.channel.queue_delete(queue, QueueDeleteOptions::default()).await?;
        Ok(())
    }
}

#[derive(Debug)]
struct AmqpProducer {
    channel: Channel,
}

#[async_trait]
impl Producer for AmqpProducer {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default(),
            )
            .await?
            .await?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }
}
