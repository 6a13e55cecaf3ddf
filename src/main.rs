//! CLI for tickcast
//!
//! Subcommands:
//! - `server`: run the broker, the WebSocket gateway and the debug API
//! - `client`: connect to a gateway, subscribe and print what arrives

use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use tickcast::actor::clock;
use tickcast::broker::Broker;
use tickcast::config::load_config;
use tickcast::ingest::{IngestQueue, TickerFeed, feed};
use tickcast::persistence::Persistence;
use tickcast::transport::http::{DebugApi, FeedControl, start_debug_server};
use tickcast::transport::websocket::start_websocket_server;
use tickcast::utils::logging;

#[derive(Parser)]
#[command(name = "tickcast")]
enum Command {
    /// Start the broker
    Server,
    /// Subscribe to topics and print every frame received
    Client {
        /// Gateway URL to connect to
        #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
        url: String,
        /// Comma-separated topic list, e.g. `aapl,msft`
        #[arg(long, default_value = "AAPL")]
        topics: String,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    logging::init("info");

    match Command::parse() {
        Command::Server => {
            if let Err(e) = run_server().await {
                error!("Server failed: {}", e);
            }
        }
        Command::Client { url, topics } => {
            if let Err(e) = run_client(&url, &topics).await {
                error!("Client failed: {}", e);
            }
        }
    }
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let persistence = Persistence::open(&config.broker.data_dir)?;
    let broker = Arc::new(Broker::start(config.clone(), persistence, clock::system())?);

    let (queue, consumer) = IngestQueue::start(broker.clone(), config.ingest.clone());
    let shared_feed = Arc::new(Mutex::new(TickerFeed::new()));
    if config.feed.enabled {
        feed::spawn(
            shared_feed.clone(),
            queue.clone(),
            Duration::from_millis(config.feed.interval_ms),
        );
        info!(interval_ms = config.feed.interval_ms, "synthetic feed running");
    }

    if config.debug.enabled {
        let api = Arc::new(DebugApi::new(
            broker.tracker().cloned(),
            Some(FeedControl {
                feed: shared_feed,
                queue: queue.clone(),
            }),
        ));
        let debug_addr = format!("{}:{}", config.server.host, config.debug.port);
        tokio::spawn(async move {
            if let Err(e) = start_debug_server(&debug_addr, api).await {
                error!("debug API failed: {e}");
            }
        });
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tokio::select! {
        result = start_websocket_server(&addr, broker.clone()) => {
            match result {
                Ok(()) => error!("WebSocket server exited unexpectedly."),
                Err(e) => error!("WebSocket server failed: {e}"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    drop(queue);
    consumer.abort();
    if let Err(e) = broker.flush().await {
        warn!("final flush failed: {e}");
    }
    Ok(())
}

async fn run_client(url: &str, topics: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (mut ws_stream, _response) = connect_async(url).await?;
    info!(%url, %topics, "connected");

    ws_stream.send(WsMessage::text(topics)).await?;

    while let Some(frame) = ws_stream.next().await {
        match frame? {
            WsMessage::Text(text) => println!("{text}"),
            WsMessage::Close(reason) => {
                info!("server closed the connection: {reason:?}");
                break;
            }
            _ => {}
        }
    }
    Ok(())
}
