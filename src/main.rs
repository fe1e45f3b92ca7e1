//! CLI for the matchday gateway
//!
//! Subcommands:
//! - `serve`: run the WebSocket gateway
//! - `publish`: publish one JSON payload on a topic through the broker
//! - `client`: connect, subscribe to a topic and print every frame (useful
//!   for smoke tests)

use clap::Parser;
use matchday_gateway::config::load_config;
use matchday_gateway::gateway::Gateway;
use matchday_gateway::utils::logging;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "matchday-gateway", version, about)]
enum Command {
    /// Run the WebSocket gateway
    Serve,
    /// Publish a payload on a topic and exit
    Publish {
        #[arg(long)]
        topic: String,
        /// JSON payload; anything that isn't JSON is sent as a string
        #[arg(long)]
        payload: String,
    },
    /// Connect, subscribe to a topic and print every frame received
    Client {
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
        #[arg(long)]
        token: String,
        #[arg(long, default_value = "match:1")]
        topic: String,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cmd = Command::parse();
    let result = match cmd {
        Command::Serve => run_server().await,
        Command::Publish { topic, payload } => run_publish(&topic, &payload).await,
        Command::Client { url, token, topic } => run_client(&url, &token, &topic).await,
    };

    if let Err(e) = result {
        // no-op when a subscriber is already installed
        logging::init("info");
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    logging::init(&config.logging.level);

    let gateway = Gateway::from_settings(config).await?;
    let listener = gateway.bind().await?;

    tokio::select! {
        _ = gateway.serve(listener) => {
            error!("WebSocket server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    gateway.shutdown().await;
    Ok(())
}

async fn run_publish(topic: &str, payload: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    logging::init(&config.logging.level);

    let value = serde_json::from_str::<serde_json::Value>(payload)
        .unwrap_or_else(|_| serde_json::Value::String(payload.to_string()));

    let gateway = Gateway::from_settings(config).await?;
    let outcome = gateway.publish(topic, &value).await;
    gateway.shutdown().await;

    let receivers = outcome?;
    println!("published to {topic} ({receivers} receivers)");
    Ok(())
}

async fn run_client(url: &str, token: &str, topic: &str) -> Result<(), Box<dyn std::error::Error>> {
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio_tungstenite::connect_async;
    use tungstenite::Message as WsMessage;

    logging::init("info");

    let mut target = url::Url::parse(url)?;
    target.query_pairs_mut().append_pair("token", token);
    let (mut ws_stream, _response) = connect_async(target.as_str()).await?;

    let subscribe = json!({ "action": "subscribe", "topic": topic });
    ws_stream
        .send(WsMessage::Text(subscribe.to_string().into()))
        .await?;

    while let Some(msg) = ws_stream.next().await {
        match msg? {
            WsMessage::Text(text) => println!("{text}"),
            WsMessage::Close(frame) => {
                println!("closed: {frame:?}");
                break;
            }
            _ => {}
        }
    }

    Ok(())
}
