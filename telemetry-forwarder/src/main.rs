use std::sync::Arc;

use common_redis::RedisClient;
use envconfig::Envconfig;
use futures::future::{select, Either};
use health::HealthRegistry;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use telemetry_forwarder::config::Config;
use telemetry_forwarder::error::ForwarderError;
use telemetry_forwarder::pipeline::ForwarderPipeline;
use telemetry_forwarder::time::SystemTime;
use telemetry_forwarder::{mqtt, server};

#[tokio::main]
async fn main() -> Result<(), ForwarderError> {
    let log_layer = fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    );
    tracing_subscriber::registry().with(log_layer).init();

    let config = Config::init_from_env()
        .map_err(|e| ForwarderError::Config(format!("failed to load configuration: {e}")))?;
    config.validate()?;

    let client = Arc::new(RedisClient::new(config.redis_url()).await?);
    let pipeline = ForwarderPipeline::new(
        client,
        &config.mqtt_base_topic,
        config.msg_ttl,
        Arc::new(SystemTime {}),
    )?
    .resolve_identity_first(config.resolve_identity_first);

    let liveness = HealthRegistry::new("liveness");
    let mqtt_liveness = liveness.register(
        "mqtt".to_string(),
        time::Duration::seconds(2 * config.mqtt_keep_alive_secs as i64),
    );

    let recorder_handle = match server::setup_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            error!(error = %e, "failed to install metrics recorder");
            None
        }
    };
    let app = server::app(recorder_handle, liveness);
    let bind = config.bind();
    let http_server = Box::pin(server::serve(app, &bind));
    let consumer = Box::pin(mqtt::run(&config, &pipeline, mqtt_liveness));

    info!(
        bind = %bind,
        subscription = %pipeline.subscription(),
        "starting telemetry forwarder"
    );

    // Bound to a local so the futures borrowing `config` and `pipeline` are
    // dropped before those locals.
    let outcome = match select(http_server, consumer).await {
        Either::Left((result, _)) => {
            result?;
            error!("http server exited");
            Ok(())
        }
        Either::Right((result, _)) => {
            if let Err(e) = &result {
                error!(error = %e, "forwarder stopped");
            }
            result
        }
    };
    outcome
}
