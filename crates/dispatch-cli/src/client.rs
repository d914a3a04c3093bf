// Small WebSocket client for poking at a running notification server.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use dispatch_core::notify::OrderEvent;
use dispatch_core::protocol::{self, ClientMessage};

/// Interval between keep-alive pings while listening.
const PING_INTERVAL: Duration = Duration::from_secs(30);

fn frame(msg: &ClientMessage) -> anyhow::Result<Message> {
    let json = serde_json::to_string(msg).context("failed to encode frame")?;
    Ok(Message::Text(json.into()))
}

/// Subscribe as `user_id` and print every frame until the server closes the
/// connection or Ctrl+C is pressed.
pub async fn listen(url: &str, user_id: &str) -> anyhow::Result<()> {
    let (ws, _) = connect_async(url)
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    info!("Connected to {}", url);
    println!("Connected to {url}, subscribing as {user_id}");

    let (mut write, mut read) = ws.split();
    write
        .send(frame(&ClientMessage::Subscribe {
            user_id: user_id.to_string(),
        })?)
        .await?;

    let mut ping = tokio::time::interval(PING_INTERVAL);
    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => println!("{}", pretty(&text)),
                    Some(Ok(Message::Close(_))) | None => {
                        println!("Server closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        bail!("connection error: {e}");
                    }
                }
            }
            _ = ping.tick() => {
                write
                    .send(frame(&ClientMessage::Ping {
                        timestamp: Some(protocol::now_millis()),
                    })?)
                    .await?;
            }
            _ = tokio::signal::ctrl_c() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
        }
    }

    Ok(())
}

/// Send the order event stored in `path` as one `orderEvent` frame.
pub async fn publish(url: &str, path: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let event: OrderEvent = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid order event", path.display()))?;

    let (mut ws, _) = connect_async(url)
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    ws.send(frame(&ClientMessage::OrderEvent(event.clone()))?)
        .await?;
    ws.close(None).await?;

    info!("Published {} for order {}", event.event_type, event.order_id);
    println!(
        "Published {} for order #{} (customer {})",
        event.event_type, event.order_id, event.customer_id
    );
    Ok(())
}

fn pretty(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| text.to_string())
}
