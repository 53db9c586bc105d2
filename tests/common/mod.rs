//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use futures_util::StreamExt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use waypost::websocket::{SessionInfo, WebSocketListener};
use waypost::{Frame, HttpServer, Route, ServerSettings, SessionId, WebSocketServer, WebSocketServerSettings};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Settings for a server on an ephemeral localhost port.
pub fn local_settings() -> ServerSettings {
    ServerSettings {
        port: 0,
        ..ServerSettings::default()
    }
}

/// Start an `HttpServer` with `routes` registered in order.
pub async fn start_server(routes: Vec<Arc<dyn Route>>) -> (HttpServer, SocketAddr) {
    let server = HttpServer::new();
    server.load_settings(local_settings());
    for route in routes {
        server.add_route(route);
    }
    server.start().await.expect("server failed to start");
    let addr = server.local_addr().expect("running server has an address");
    (server, addr)
}

/// Start a `WebSocketServer` with default routes plus `listener`.
pub async fn start_ws_server(
    settings: WebSocketServerSettings,
    listener: Arc<dyn WebSocketListener>,
) -> (WebSocketServer, SocketAddr) {
    let server = WebSocketServer::new();
    server.load_settings(WebSocketServerSettings {
        server: local_settings(),
        ..settings
    });
    server.register_listener(listener);
    server.start().await.expect("server failed to start");
    let addr = server.server().local_addr().expect("running server has an address");
    (server, addr)
}

/// HTTP client without pooling or proxies, so each test sees fresh connections.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

pub async fn ws_connect(addr: SocketAddr, path: &str) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}{path}"))
        .await
        .expect("websocket handshake failed");
    client
}

pub async fn ws_connect_with(
    addr: SocketAddr,
    path: &str,
    headers: &[(&'static str, &str)],
) -> Result<Client, tokio_tungstenite::tungstenite::Error> {
    let mut request = format!("ws://{addr}{path}").into_client_request()?;
    for (name, value) in headers {
        request.headers_mut().insert(*name, value.parse().unwrap());
    }
    tokio_tungstenite::connect_async(request).await.map(|(client, _)| client)
}

/// Next text message, skipping control frames.
pub async fn next_text(client: &mut Client) -> String {
    let read = async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => return text.as_str().to_string(),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                other => panic!("expected text message, got {other:?}"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .expect("timed out waiting for a text message")
}

/// Wait for the server to end the connection.
pub async fn expect_closed(client: &mut Client) {
    let read = async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .expect("server never closed the connection");
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Run `f` concurrently `n` times and collect the results.
pub async fn concurrently<F, Fut, T>(n: usize, f: F) -> Vec<T>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let tasks: Vec<_> = (0..n).map(|i| tokio::spawn(f(i))).collect();
    let mut results = Vec::with_capacity(n);
    for task in tasks {
        results.push(task.await.unwrap());
    }
    results
}

/// Listener that records every event.
#[derive(Default)]
pub struct Recorder {
    pub opened: Mutex<Vec<SessionId>>,
    pub frames: Mutex<Vec<(SessionId, Frame)>>,
    pub closed: Mutex<Vec<SessionId>>,
}

impl Recorder {
    pub fn opened(&self) -> Vec<SessionId> {
        self.opened.lock().unwrap().clone()
    }

    pub fn closed(&self) -> Vec<SessionId> {
        self.closed.lock().unwrap().clone()
    }

    pub fn frames(&self) -> Vec<(SessionId, Frame)> {
        self.frames.lock().unwrap().clone()
    }
}

impl WebSocketListener for Recorder {
    fn on_open(&self, session: &SessionInfo) {
        self.opened.lock().unwrap().push(session.id);
    }

    fn on_frame(&self, session: SessionId, frame: &Frame) {
        self.frames.lock().unwrap().push((session, frame.clone()));
    }

    fn on_close(&self, session: SessionId) {
        self.closed.lock().unwrap().push(session);
    }
}
