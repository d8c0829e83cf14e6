use anyhow::{anyhow, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info};

use crate::config::WatchArgs;

/// Join `args.address` and print every text frame as one JSON line on stdout.
pub async fn run_watch(args: WatchArgs) -> Result<()> {
    let ws_url = format!("{}/ws", args.url.trim_end_matches('/'));
    debug!("Connecting to {} for address {}", ws_url, args.address);

    let (ws_stream, _) = match timeout(Duration::from_secs(5), connect_async(&ws_url)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!("Failed to connect to {}: {}", ws_url, e);
            return Err(anyhow!("Connection failed: {}", e));
        }
        Err(_) => {
            error!("Connection timeout after 5 seconds");
            return Err(anyhow!(
                "Connection timeout - is the signaling server running?"
            ));
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let join = json!({ "type": "join", "address": args.address }).to_string();
    write.send(Message::Text(join.into())).await?;
    info!(address = %args.address, "joined; waiting for frames");

    let heartbeat_text = json!({ "type": "heartbeat", "foreground": true }).to_string();
    let mut heartbeat = tokio::time::interval(Duration::from_secs(args.heartbeat_secs.max(1)));
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                write.send(Message::Text(heartbeat_text.clone().into())).await?;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => println!("{}", text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        info!(reason = ?frame.map(|f| f.reason.to_string()), "server closed connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(anyhow!("WebSocket error: {}", e)),
                    None => break,
                }
            }
        }
    }

    Ok(())
}
