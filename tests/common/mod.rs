//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use bytes::{BufMut, Bytes};
use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use tunnel_gateway::protocol::{Address, RequestHeader};
use tunnel_gateway::{GatewayConfig, HttpServer, Shutdown};

pub const IDENTITY: &str = "d342d11e-d424-4583-b36e-524ab1f0afa4";

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a destination that echoes every byte back.
pub async fn start_echo_destination() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    addr
}

/// Start a destination that accepts and hangs up without answering.
pub async fn start_closing_destination() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            drop(socket);
        }
    });

    addr
}

/// An address nothing listens on.
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Config pointing the fallback relay at `fallback`.
pub fn gateway_config(fallback: SocketAddr) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.identity.uuid = IDENTITY.into();
    config.upstream.fallback_host = fallback.ip().to_string();
    config.upstream.fallback_port = fallback.port();
    config.timeouts.connect_secs = 2;
    config
}

/// Start the gateway on an ephemeral port. Keep the `Shutdown` alive for the
/// duration of the test.
pub async fn start_gateway(config: GatewayConfig) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let server = HttpServer::new(config);
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    (addr, shutdown)
}

/// Envelope for a stream tunnel to `target`, followed by `payload`.
pub fn envelope(identity: &str, target: SocketAddr, payload: &[u8]) -> Bytes {
    let identity = Uuid::parse_str(identity).unwrap();
    let header = RequestHeader::stream(identity, Address::from_host(&target.ip().to_string()), target.port());
    let mut buf = header.encode().unwrap();
    buf.put_slice(payload);
    buf.freeze()
}

/// Open a tunnel, optionally carrying `early_data` in the upgrade request.
pub async fn connect(gateway: SocketAddr, early_data: Option<&str>) -> Client {
    let mut request = format!("ws://{}/", gateway).into_client_request().unwrap();
    if let Some(value) = early_data {
        request
            .headers_mut()
            .insert("sec-websocket-protocol", HeaderValue::from_str(value).unwrap());
    }
    let (socket, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    socket
}

/// Next binary message, or `None` once the tunnel closes.
pub async fn next_binary(socket: &mut Client) -> Option<Bytes> {
    let wait = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(msg) = socket.next().await {
            match msg {
                Ok(Message::Binary(data)) => return Some(data),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
        None
    });
    wait.await.expect("timed out waiting for the gateway")
}

/// Send a raw upgrade request over plain HTTP and return the status code.
pub async fn raw_upgrade(gateway: SocketAddr, protocol: Option<&str>) -> reqwest::StatusCode {
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let mut request = client
        .get(format!("http://{}/", gateway))
        .header("connection", "upgrade")
        .header("upgrade", "websocket")
        .header("sec-websocket-version", "13")
        .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==");
    if let Some(protocol) = protocol {
        request = request.header("sec-websocket-protocol", protocol);
    }
    request.send().await.unwrap().status()
}
