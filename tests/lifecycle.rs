//! Start/stop semantics of a running server.

use axum::http::StatusCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use waypost::{FnRoute, HttpServer, Route, RouteMatch, ServerState, Shutdown, WebSocketServerSettings};

mod common;

use common::Recorder;

#[tokio::test]
async fn test_stop_waits_for_in_flight_handlers() {
    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();
    let slow: Arc<dyn Route> = Arc::new(FnRoute::new("slow", RouteMatch::prefix("/slow"), move |_req| {
        let flag = flag.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            flag.store(true, Ordering::SeqCst);
            "done"
        }
    }));
    let (server, addr) = common::start_server(vec![slow]).await;

    let request = tokio::spawn(async move {
        common::http_client()
            .get(format!("http://{addr}/slow"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap()
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    server.stop().await;
    assert!(finished.load(Ordering::SeqCst), "stop() returned before the handler finished");
    assert_eq!(request.await.unwrap(), "done");
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn test_stopped_server_refuses_connections() {
    let (server, addr) = common::start_server(vec![]).await;
    server.stop().await;

    let result = common::http_client()
        .get(format!("http://{addr}/"))
        .timeout(Duration::from_secs(2))
        .send()
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_restart_after_stop() {
    let route: Arc<dyn Route> = Arc::new(FnRoute::new("ok", RouteMatch::default(), |_req| async { "ok" }));
    let (server, _) = common::start_server(vec![route]).await;
    server.stop().await;

    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();
    let res = common::http_client()
        .get(format!("http://{addr}/"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    server.stop().await;
}

#[tokio::test]
async fn test_double_start_keeps_single_listener() {
    let (server, addr) = common::start_server(vec![]).await;
    server.start().await.unwrap();
    assert_eq!(server.local_addr(), Some(addr));
    server.stop().await;
    assert!(!server.is_running());
}

#[tokio::test]
async fn test_stop_closes_websocket_sessions() {
    let recorder = Arc::new(Recorder::default());
    let (server, addr) = common::start_ws_server(WebSocketServerSettings::default(), recorder.clone()).await;

    let mut a = common::ws_connect(addr, "/ws").await;
    let mut b = common::ws_connect(addr, "/ws").await;
    assert!(common::wait_until(Duration::from_secs(5), || server.client_count() == 2).await);

    tokio::time::timeout(Duration::from_secs(10), server.stop())
        .await
        .expect("stop() hung on open sessions");

    // stop() waits for session tasks, so callbacks have already run.
    assert_eq!(server.client_count(), 0);
    assert_eq!(recorder.closed().len(), 2);
    common::expect_closed(&mut a).await;
    common::expect_closed(&mut b).await;
}

#[tokio::test]
async fn test_process_shutdown_stops_server() {
    let shutdown = Shutdown::new();
    let server = HttpServer::with_shutdown(&shutdown);
    server.load_settings(common::local_settings());
    server.start().await.unwrap();

    let started = Instant::now();
    shutdown.trigger();
    assert!(common::wait_until(Duration::from_secs(5), || server.state() == ServerState::Stopped).await);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(server.local_addr().is_none());
}
