// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/fallwatch-rs

//! MQTT ingress feeding the dispatcher

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, ClientError, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::core::{Dispatcher, Routing};
use crate::error::TransportError;

/// Subscribed MQTT client whose event loop hands payloads to the dispatcher
pub struct MqttIngress {
    client: AsyncClient,
    task: JoinHandle<()>,
    stopping: Arc<AtomicBool>,
    broker: String,
}

/// Client id to present to the broker
pub fn client_id(config: &TransportConfig) -> String {
    if config.client_id.is_empty() {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("fallwatch-{}", &suffix[..8])
    } else {
        config.client_id.clone()
    }
}

/// Topic filters to subscribe to
pub fn subscriptions(config: &TransportConfig, routing: Routing) -> Vec<String> {
    let base = config.topic.trim_end_matches('/').to_string();
    match routing {
        Routing::Shared => vec![base],
        // `#` also matches the parent level, so one filter covers both
        Routing::TopicAffinity => vec![format!("{base}/#")],
    }
}

pub fn mqtt_options(config: &TransportConfig) -> MqttOptions {
    let mut options = MqttOptions::new(client_id(config), &config.broker, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
    options.set_clean_session(true);

    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        options.set_credentials(username, password);
    }

    if config.use_tls {
        options.set_transport(Transport::tls_with_default_config());
    }

    options
}

fn subscribe_all(client: &AsyncClient, topics: &[String]) -> Result<(), ClientError> {
    for topic in topics {
        client.try_subscribe(topic, QoS::AtMostOnce)?;
    }
    Ok(())
}

impl MqttIngress {
    /// Connect, subscribe and start delivering to `dispatcher`.
    ///
    /// Fails if the broker has not acknowledged within the connect timeout.
    pub async fn connect(
        config: &TransportConfig,
        routing: Routing,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self, TransportError> {
        let broker = format!("{}:{}", config.broker, config.port);
        let topics = subscriptions(config, routing);
        let (client, eventloop) = AsyncClient::new(mqtt_options(config), 100);

        let stopping = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            topics,
            dispatcher,
            stopping.clone(),
            Duration::from_millis(config.reconnect_delay_ms),
            ready_tx,
        ));

        let timeout = Duration::from_secs(config.connect_timeout_secs);
        let outcome = match tokio::time::timeout(timeout, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Connect("event loop ended".into())),
            Err(_) => Err(TransportError::Timeout {
                broker: broker.clone(),
                secs: config.connect_timeout_secs,
            }),
        };

        if let Err(e) = outcome {
            stopping.store(true, Ordering::Release);
            task.abort();
            return Err(e);
        }

        info!("MQTT connected to {}, subscribed to {}", broker, config.topic);
        Ok(Self {
            client,
            task,
            stopping,
            broker,
        })
    }

    /// Stop receiving and close the broker session
    pub async fn disconnect(self) {
        self.stopping.store(true, Ordering::Release);
        if let Err(e) = self.client.disconnect().await {
            debug!("MQTT disconnect request failed: {}", e);
        }
        if tokio::time::timeout(Duration::from_secs(2), self.task).await.is_err() {
            debug!("MQTT event loop did not stop in time");
        }
        info!("MQTT disconnected from {}", self.broker);
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topics: Vec<String>,
    dispatcher: Arc<Dispatcher>,
    stopping: Arc<AtomicBool>,
    reconnect_delay: Duration,
    ready: oneshot::Sender<Result<(), TransportError>>,
) {
    let mut ready = Some(ready);

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                // Session is clean, so subscriptions are renewed on every connect
                let result = subscribe_all(&client, &topics);
                match ready.take() {
                    Some(tx) => {
                        let _ = tx.send(result.map_err(TransportError::from));
                    }
                    None => match result {
                        Ok(()) => info!("MQTT reconnected, subscriptions renewed"),
                        Err(e) => warn!("MQTT resubscribe failed: {}", e),
                    },
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if dispatcher.may_block() {
                    tokio::task::block_in_place(|| dispatcher.dispatch(&publish.topic, &publish.payload));
                } else {
                    dispatcher.dispatch(&publish.topic, &publish.payload);
                }
            }
            Ok(_) => {}
            Err(e) => {
                if stopping.load(Ordering::Acquire) {
                    break;
                }
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(TransportError::Connect(e.to_string())));
                    break;
                }
                warn!("MQTT error: {}, retrying in {:?}", e, reconnect_delay);
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
    debug!("MQTT event loop stopped");
}
