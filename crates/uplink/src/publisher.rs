//! Publish collaborator and its MQTT implementation

use crate::PublishError;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Delivers serialized samples.
///
/// A publish cycle is `open`, any number of `publish` calls, then `close`.
/// `publish` returns `Ok` only once the transport has confirmed delivery.
pub trait Publisher: Send {
    /// Start a session
    fn open(&mut self) -> impl Future<Output = Result<(), PublishError>> + Send;

    /// Deliver one message
    fn publish(&mut self, payload: String) -> impl Future<Output = Result<(), PublishError>> + Send;

    /// End the session
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// MQTT publisher configuration
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker host name or address
    pub broker_host: String,
    /// Broker port
    pub broker_port: u16,
    /// Client identifier
    pub client_id: String,
    /// Topic every sample is published on
    pub topic: String,
    /// Keep-alive interval
    pub keep_alive: Duration,
    /// Upper bound for CONNACK after opening a session
    pub connect_timeout: Duration,
    /// Upper bound for the PUBACK of one publish
    pub ack_timeout: Duration,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: "climate-station".to_string(),
            topic: "sensors/climate".to_string(),
            keep_alive: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(5),
        }
    }
}

/// Delivery progress reported by the event loop
#[derive(Debug)]
enum Delivery {
    /// PUBLISH written with this packet id
    Sent(u16),
    /// Broker acknowledged this packet id
    Acked(u16),
    /// Connection broke; the event loop has stopped
    Failed(String),
}

struct Session {
    client: AsyncClient,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    event_loop: JoinHandle<()>,
}

impl Session {
    /// Wait for the PUBACK of the publish just handed to the client.
    ///
    /// One publish is in flight at a time, so the first `Sent` after the
    /// request carries its packet id.
    async fn confirm(&mut self) -> Result<(), PublishError> {
        let mut pkid = None;
        while let Some(delivery) = self.deliveries.recv().await {
            match delivery {
                Delivery::Sent(id) if pkid.is_none() => pkid = Some(id),
                Delivery::Acked(id) if pkid == Some(id) => return Ok(()),
                Delivery::Sent(_) | Delivery::Acked(_) => {}
                Delivery::Failed(reason) => return Err(PublishError::Connection(reason)),
            }
        }
        Err(PublishError::Connection("MQTT event loop stopped".to_string()))
    }
}

/// Publishes samples with QoS 1 through a per-cycle MQTT session
pub struct MqttPublisher {
    config: MqttConfig,
    session: Option<Session>,
}

impl MqttPublisher {
    /// Create a new MQTT publisher (no connection is made until `open`)
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    /// Check if a session is open
    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Drop a session whose delivery state can no longer be trusted
    fn abandon_session(&mut self) {
        if let Some(session) = self.session.take() {
            warn!("Abandoning MQTT session after failed delivery");
            session.event_loop.abort();
        }
    }
}

impl Publisher for MqttPublisher {
    async fn open(&mut self) -> Result<(), PublishError> {
        if self.session.is_some() {
            return Ok(());
        }

        info!(
            "Initializing MQTT client for {}:{}",
            self.config.broker_host, self.config.broker_port
        );

        let mut options = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.broker_host.clone(),
            self.config.broker_port,
        );
        options.set_keep_alive(self.config.keep_alive);

        let (client, mut eventloop) = AsyncClient::new(options, 16);
        let (connected_tx, connected_rx) = oneshot::channel();
        let (deliveries_tx, deliveries) = mpsc::unbounded_channel();

        let event_loop = tokio::spawn(async move {
            let mut connected_tx = Some(connected_tx);
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        debug!("MQTT connected: {:?}", ack.code);
                        if let Some(tx) = connected_tx.take() {
                            let _ = tx.send(());
                        }
                    }
                    Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                        let _ = deliveries_tx.send(Delivery::Sent(pkid));
                    }
                    Ok(Event::Incoming(Packet::PubAck(ack))) => {
                        debug!("MQTT published, pkid={}", ack.pkid);
                        let _ = deliveries_tx.send(Delivery::Acked(ack.pkid));
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        debug!("MQTT disconnect sent");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        // Sessions are per cycle; the next cycle reconnects
                        error!("MQTT error: {}", e);
                        let _ = deliveries_tx.send(Delivery::Failed(e.to_string()));
                        break;
                    }
                }
            }
        });

        let timeout_ms = self.config.connect_timeout.as_millis();
        match tokio::time::timeout(self.config.connect_timeout, connected_rx).await {
            Ok(Ok(())) => {
                info!("Connected to MQTT broker: {}", self.config.broker_host);
                self.session = Some(Session {
                    client,
                    deliveries,
                    event_loop,
                });
                Ok(())
            }
            _ => {
                event_loop.abort();
                Err(PublishError::Connection(format!(
                    "no CONNACK from {}:{} within {}ms",
                    self.config.broker_host, self.config.broker_port, timeout_ms
                )))
            }
        }
    }

    async fn publish(&mut self, payload: String) -> Result<(), PublishError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| PublishError::Connection("Not connected".to_string()))?;

        let queued = session
            .client
            .publish(
                self.config.topic.clone(),
                QoS::AtLeastOnce,
                false,
                payload.into_bytes(),
            )
            .await
            .map_err(|e| PublishError::Publish(e.to_string()));

        let ack_timeout = self.config.ack_timeout;
        let result = match queued {
            Ok(()) => match tokio::time::timeout(ack_timeout, session.confirm()).await {
                Ok(confirmed) => confirmed,
                Err(_) => Err(PublishError::Publish(format!(
                    "no PUBACK within {}ms",
                    ack_timeout.as_millis()
                ))),
            },
            Err(e) => Err(e),
        };

        if result.is_err() {
            self.abandon_session();
        }
        result
    }

    async fn close(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        info!("Disconnecting MQTT");
        if let Err(e) = session.client.disconnect().await {
            warn!("MQTT disconnect request failed: {}", e);
        }

        if tokio::time::timeout(Duration::from_secs(2), &mut session.event_loop)
            .await
            .is_err()
        {
            session.event_loop.abort();
        }
    }
}
