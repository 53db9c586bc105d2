//! Embeddable HTTP server.
//!
//! # Responsibilities
//! - Own the route registry and the server settings
//! - Bind the listener (plain or TLS) and run the accept loop
//! - Wire the middleware stack (request id, tracing, timeout, `Server` header)
//!   in front of the dispatcher
//! - Stop gracefully: close the listener, signal long-lived handlers, wait for
//!   every in-flight handler to exit
//! - Stop on process shutdown when attached to a [`Shutdown`]
//!
//! # Lifecycle
//! ```text
//! Unconfigured ──load_settings──► Configured ──start──► Running ──stop──► Stopped
//!                                                          ▲                 │
//!                                                          └──────start──────┘
//! ```
//!
//! # Design Decisions
//! - TLS material is loaded before binding, so a bad certificate never leaves
//!   a half-started server behind
//! - The accept loop runs on a spawned task driven by an axum-server `Handle`
//! - Every request passes through one axum fallback into the dispatcher;
//!   axum's own router is not used for matching

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use hyper_util::rt::TokioTimer;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tokio::task::JoinHandle;
use tower_http::add_extension::AddExtension;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerSettings;
use crate::lifecycle::Shutdown;
use crate::net::connection::{ConnectionContext, ConnectionTracker};
use crate::net::listener::{self, ListenerError};
use crate::net::tls::{load_tls_config, TlsError};
use crate::routing::dispatcher::{dispatch_handler, Dispatcher};
use crate::routing::registry::{RouteList, RouteRegistry};
use crate::routing::route::Route;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("server settings have not been loaded")]
    NotConfigured,

    #[error("secure channel setup failed: {0}")]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Bind(#[from] ListenerError),

    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Unconfigured,
    Configured,
    Running,
    Stopped,
}

struct RunningServer {
    handle: Handle,
    task: JoinHandle<std::io::Result<()>>,
    tracker: ConnectionTracker,
    local_addr: SocketAddr,
    settings: ServerSettings,
}

struct Inner {
    settings: RwLock<Option<ServerSettings>>,
    routes: Arc<RouteRegistry>,
    state: Mutex<ServerState>,
    local_addr: Mutex<Option<SocketAddr>>,
    running: tokio::sync::Mutex<Option<RunningServer>>,
}

/// An HTTP/WebSocket server with an ordered route table.
pub struct HttpServer {
    inner: Arc<Inner>,
    exit_hook: Mutex<Option<JoinHandle<()>>>,
}

impl HttpServer {
    /// Create an unconfigured server.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                settings: RwLock::new(None),
                routes: Arc::new(RouteRegistry::new()),
                state: Mutex::new(ServerState::Unconfigured),
                local_addr: Mutex::new(None),
                running: tokio::sync::Mutex::new(None),
            }),
            exit_hook: Mutex::new(None),
        }
    }

    /// Create a server that stops itself when `shutdown` fires.
    pub fn with_shutdown(shutdown: &Shutdown) -> Self {
        let server = Self::new();
        server.attach_shutdown(shutdown);
        server
    }

    /// Stop this server when `shutdown` fires. Replaces any earlier
    /// attachment; dropping the server detaches it.
    pub fn attach_shutdown(&self, shutdown: &Shutdown) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let shutdown = shutdown.clone();
        let hook = tokio::spawn(async move {
            shutdown.wait().await;
            if let Some(inner) = weak.upgrade() {
                tracing::info!("Process shutdown, stopping server");
                inner.stop().await;
            }
        });

        let previous = self
            .exit_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(hook);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Store settings for the next `start()`. A running server keeps its
    /// current settings until restarted.
    pub fn load_settings(&self, settings: ServerSettings) {
        *self.inner.settings.write().unwrap_or_else(PoisonError::into_inner) = Some(settings);
        let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == ServerState::Unconfigured {
            *state = ServerState::Configured;
        }
    }

    pub fn settings(&self) -> Option<ServerSettings> {
        self.inner.settings.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn state(&self) -> ServerState {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    pub fn add_route(&self, route: Arc<dyn Route>) {
        self.inner.routes.add(route);
    }

    /// Remove every registration of `route`.
    pub fn remove_route(&self, route: &Arc<dyn Route>) -> usize {
        self.inner.routes.remove(route)
    }

    pub fn clear_routes(&self) {
        self.inner.routes.clear();
    }

    /// Routes in registration order.
    pub fn routes(&self) -> Arc<RouteList> {
        self.inner.routes.snapshot()
    }

    /// Bind and start serving. Starting a running server is a no-op.
    pub async fn start(&self) -> Result<(), ServerError> {
        self.inner.start().await
    }

    /// Stop serving and wait for every in-flight handler to exit.
    pub async fn stop(&self) {
        self.inner.stop().await;
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configured port, or the bound one while running.
    pub fn port(&self) -> Option<u16> {
        match self.local_addr() {
            Some(addr) => Some(addr.port()),
            None => self.settings().map(|s| s.port),
        }
    }

    /// `host:port/`, with the bound port while running.
    pub fn url(&self) -> Option<String> {
        let mut settings = self.settings()?;
        if let Some(port) = self.port() {
            settings.port = port;
        }
        Some(settings.url())
    }
}

impl Default for HttpServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        if let Some(hook) = self.exit_hook.lock().unwrap_or_else(PoisonError::into_inner).take() {
            hook.abort();
        }
        // No runtime is guaranteed here, so no graceful drain: just close the listener.
        if let Ok(running) = self.inner.running.try_lock() {
            if let Some(running) = running.as_ref() {
                running.tracker.begin_shutdown();
                running.handle.shutdown();
            }
        }
    }
}

impl std::fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServer")
            .field("state", &self.state())
            .field("routes", &self.inner.routes)
            .finish()
    }
}

impl Inner {
    async fn start(&self) -> Result<(), ServerError> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            tracing::warn!(address = %current.local_addr, "Server already running");
            return Ok(());
        }

        let Some(settings) = self.settings.read().unwrap_or_else(PoisonError::into_inner).clone() else {
            tracing::error!("start() called before settings were loaded");
            return Err(ServerError::NotConfigured);
        };

        let tls = if settings.use_secure_channel {
            match load_tls_config(settings.tls.as_ref()).await {
                Ok(tls) => Some(tls),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to set up secure channel");
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        let std_listener = match listener::bind(&settings).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(error = %e, "Failed to bind listener");
                return Err(e.into());
            }
        };

        let tracker = ConnectionTracker::new();
        let dispatcher = Arc::new(
            Dispatcher::new(
                Arc::clone(&self.routes),
                settings.use_secure_channel,
                settings.max_threads,
                tracker.clone(),
            )
            .with_max_keep_alive_requests(settings.max_keep_alive_requests),
        );
        let app = build_router(&settings, dispatcher);

        let handle = Handle::new();
        let task = spawn_server(std_listener, tls, &settings, app, handle.clone());

        let local_addr = match handle.listening().await {
            Some(addr) => addr,
            None => {
                let error = match task.await {
                    Ok(Err(e)) => e,
                    Ok(Ok(())) => std::io::Error::other("server exited before listening"),
                    Err(join) => std::io::Error::other(join),
                };
                tracing::error!(error = %error, "Server failed to start");
                return Err(ServerError::Io(error));
            }
        };

        tracing::info!(
            address = %local_addr,
            name = %settings.server_name(),
            secure = settings.use_secure_channel,
            routes = self.routes.len(),
            "Server started"
        );

        *running = Some(RunningServer {
            handle,
            task,
            tracker,
            local_addr,
            settings,
        });
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = Some(local_addr);
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = ServerState::Running;
        Ok(())
    }

    async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(server) = running.take() else {
            tracing::warn!("stop() called on a server that is not running");
            return;
        };

        tracing::info!(
            address = %server.local_addr,
            in_flight = server.tracker.active_count(),
            "Stopping server"
        );

        // Close the listener and let idle keep-alive connections drain.
        server
            .handle
            .graceful_shutdown(Some(server.settings.thread_idle_time()));
        // Upgraded connections are outside the accept loop's reach.
        server.tracker.begin_shutdown();

        match server.task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Accept loop ended with an error"),
            Err(e) => tracing::warn!(error = %e, "Accept loop task failed"),
        }

        server.tracker.wait_idle().await;

        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = None;
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = ServerState::Stopped;
        tracing::info!(address = %server.local_addr, "Server stopped");
    }
}

/// Middleware stack around the dispatcher.
#[allow(deprecated)]
fn build_router(settings: &ServerSettings, dispatcher: Arc<Dispatcher>) -> Router {
    let server_header = HeaderValue::from_str(&settings.software_version)
        .unwrap_or_else(|_| HeaderValue::from_static("waypost"));

    Router::new()
        .fallback(dispatch_handler)
        .with_state(dispatcher)
        .layer(DefaultBodyLimit::disable())
        .layer(TimeoutLayer::new(settings.request_timeout()))
        .layer(SetResponseHeaderLayer::if_not_present(header::SERVER, server_header))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

fn spawn_server(
    std_listener: std::net::TcpListener,
    tls: Option<RustlsConfig>,
    settings: &ServerSettings,
    app: Router,
    handle: Handle,
) -> JoinHandle<std::io::Result<()>> {
    // One `ConnectionContext` per accepted connection.
    let make_service = tower::service_fn(move |peer: SocketAddr| {
        std::future::ready(Ok::<_, Infallible>(AddExtension::new(
            app.clone(),
            ConnectionContext::new(peer),
        )))
    });

    match tls {
        Some(tls) => {
            let mut server = axum_server::tls_rustls::from_tcp_rustls(std_listener, tls).handle(handle);
            configure_http(server.http_builder(), settings);
            tokio::spawn(async move { server.serve(make_service).await })
        }
        None => {
            let mut server = axum_server::from_tcp(std_listener).handle(handle);
            configure_http(server.http_builder(), settings);
            tokio::spawn(async move { server.serve(make_service).await })
        }
    }
}

fn configure_http(
    builder: &mut hyper_util::server::conn::auto::Builder<hyper_util::rt::TokioExecutor>,
    settings: &ServerSettings,
) {
    let mut http1 = builder.http1();
    http1.timer(TokioTimer::new()).keep_alive(settings.keep_alive);
    if settings.keep_alive_timeout_secs > 0 {
        http1.header_read_timeout(settings.keep_alive_timeout());
    }
}
