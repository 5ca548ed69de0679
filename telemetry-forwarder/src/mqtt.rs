use std::time::Duration;

use health::HealthHandle;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::ForwarderError;
use crate::pipeline::ForwarderPipeline;

const REQUEST_CHANNEL_CAPACITY: usize = 10;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

pub fn mqtt_options(config: &Config) -> Result<MqttOptions, ForwarderError> {
    let mut options = MqttOptions::new(
        config.mqtt_client_id.clone(),
        config.mqtt_host.clone(),
        config.mqtt_port,
    );
    options.set_keep_alive(config.keep_alive());
    if let Some((username, password)) = config.mqtt_credentials()? {
        options.set_credentials(username, password);
    }
    Ok(options)
}

/// Consume broker traffic until a store error occurs.
///
/// Publishes are handed to the pipeline one at a time in delivery order.
/// Connection errors are logged and retried, the event loop reconnects on the
/// next poll.
pub async fn run(
    config: &Config,
    pipeline: &ForwarderPipeline,
    liveness: HealthHandle,
) -> Result<(), ForwarderError> {
    let (client, mut eventloop) =
        AsyncClient::new(mqtt_options(config)?, REQUEST_CHANNEL_CAPACITY);
    let subscription = pipeline.subscription();

    loop {
        match eventloop.poll().await {
            Ok(event) => {
                liveness.report_healthy();
                match event {
                    Event::Incoming(Packet::ConnAck(_)) => {
                        info!(
                            host = %config.mqtt_host,
                            port = config.mqtt_port,
                            "connected to broker"
                        );
                        // Sessions are clean, so every reconnect needs a new subscription.
                        client.subscribe(subscription.as_str(), QoS::AtMostOnce).await?;
                        info!(topic = %subscription, "subscribed");
                    }
                    Event::Incoming(Packet::Publish(publish)) => {
                        let outcome = pipeline.handle(&publish.topic, &publish.payload).await?;
                        debug!(
                            topic = %publish.topic,
                            outcome = outcome.label(),
                            "handled publish"
                        );
                    }
                    Event::Incoming(Packet::Disconnect) => warn!("broker sent disconnect"),
                    Event::Incoming(_) | Event::Outgoing(_) => {}
                }
            }
            Err(e) => {
                error!(error = %e, "mqtt connection error, retrying");
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
        }
    }
}
