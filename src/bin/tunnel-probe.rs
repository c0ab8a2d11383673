//! Probe client for the tunnel gateway.
//!
//! Opens one tunnel, sends an envelope for `--target` followed by an optional
//! payload, then prints the acknowledgment and whatever the destination
//! answers until the tunnel closes or `--wait` elapses.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::{BufMut, Bytes};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use tunnel_gateway::protocol::{Address, RequestHeader};

#[derive(Parser)]
#[command(name = "tunnel-probe")]
#[command(about = "Open a single tunnel through the gateway", long_about = None)]
struct Cli {
    /// Gateway WebSocket URL.
    #[arg(short, long, default_value = "ws://127.0.0.1:8080/")]
    url: String,

    /// Caller identity (UUID).
    #[arg(short, long, env = "UUID")]
    identity: Uuid,

    /// Destination as host:port.
    #[arg(short, long)]
    target: String,

    /// Payload sent right after the envelope.
    #[arg(short, long, default_value = "")]
    payload: String,

    /// Carry the envelope in the upgrade request instead of the first message.
    #[arg(long)]
    early_data: bool,

    /// Seconds to wait for responses.
    #[arg(short, long, default_value_t = 5)]
    wait: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (host, port) = cli
        .target
        .rsplit_once(':')
        .ok_or("target must be host:port")?;
    let port: u16 = port.parse()?;

    let mut envelope = RequestHeader::stream(cli.identity, Address::from_host(host), port).encode()?;
    envelope.put_slice(cli.payload.as_bytes());
    let envelope = envelope.freeze();

    let mut request = cli.url.as_str().into_client_request()?;
    if cli.early_data {
        let value = HeaderValue::from_str(&URL_SAFE_NO_PAD.encode(&envelope))?;
        request.headers_mut().insert("sec-websocket-protocol", value);
    }

    let (mut socket, response) = tokio_tungstenite::connect_async(request).await?;
    println!("Connected: HTTP {}", response.status());

    if !cli.early_data {
        socket.send(Message::Binary(envelope)).await?;
    }

    let mut first = true;
    let deadline = tokio::time::sleep(Duration::from_secs(cli.wait));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            msg = socket.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    let data = if first { print_ack(data)? } else { data };
                    first = false;
                    println!("{}", String::from_utf8_lossy(&data));
                }
                Some(Ok(Message::Close(_))) | None => {
                    println!("Tunnel closed");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
            _ = &mut deadline => {
                println!("No more data after {}s", cli.wait);
                let _ = socket.close(None).await;
                break;
            }
        }
    }

    Ok(())
}

/// Strip and print the two-byte acknowledgment.
fn print_ack(data: Bytes) -> Result<Bytes, Box<dyn std::error::Error>> {
    if data.len() < 2 {
        return Err("response shorter than the acknowledgment".into());
    }
    println!("Ack: version={} status={}", data[0], data[1]);
    Ok(data.slice(2..))
}
