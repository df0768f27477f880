//! CLI for RelayMQ
//!
//! Subcommands:
//! - `server`: run the broker
//! - `produce`: publish one message (useful for smoke tests)
//! - `consume`: subscribe and print deliveries

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use relaymq::broker::Broker;
use relaymq::client::{self, Consumer};
use relaymq::config::{Settings, load_config};
use relaymq::metrics::{self, BrokerMetrics};
use relaymq::transport::Server;
use relaymq::utils::logging;
use tracing::{debug, error, info};

#[derive(Parser)]
#[command(name = "relaymq")]
enum Command {
    /// Start the broker
    Server,
    /// Publish a single message
    Produce {
        /// Broker address
        #[arg(long, default_value = "127.0.0.1:8000")]
        addr: String,
        #[arg(long)]
        topic: String,
        #[arg(long, default_value = "")]
        body: String,
    },
    /// Subscribe to a topic and print every delivery as a JSON line
    Consume {
        /// Broker address
        #[arg(long, default_value = "127.0.0.1:8000")]
        addr: String,
        #[arg(long)]
        topic: String,
        /// Exit after this many messages
        #[arg(long)]
        count: Option<usize>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(2);
        }
    };
    logging::init(&settings.log.level, settings.log.debug);

    let result: Result<(), Box<dyn std::error::Error>> = match Command::parse() {
        Command::Server => run_server(settings).await,
        Command::Produce { addr, topic, body } => client::publish(addr.as_str(), &topic, &body)
            .await
            .map_err(Into::into),
        Command::Consume { addr, topic, count } => run_consumer(&addr, &topic, count).await,
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run_server(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let recorder = metrics::install_recorder()?;
    let broker = Arc::new(Broker::with_metrics(
        settings.broker.clone(),
        Arc::new(BrokerMetrics::new()),
    ));

    let server = Server::bind(&settings.server, broker).await?;
    let shutdown = server.shutdown_token();
    let serving = tokio::spawn(server.run());

    if settings.metrics.log_interval_secs > 0 {
        let recorder = recorder.clone();
        let period = Duration::from_secs(settings.metrics.log_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                debug!(metrics = %metrics::summary(&recorder), "broker metrics");
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully.");
    shutdown.cancel();
    serving.await?;

    info!(metrics = %metrics::summary(&recorder), "final broker metrics");
    Ok(())
}

async fn run_consumer(
    addr: &str,
    topic: &str,
    count: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut consumer = Consumer::connect(addr, topic).await?;
    let mut received = 0;

    while count.is_none_or(|limit| received < limit) {
        let Some(message) = consumer.next_message().await? else {
            info!("broker closed the connection");
            break;
        };
        println!("{}", serde_json::to_string(&message)?);
        received += 1;
    }
    Ok(())
}
