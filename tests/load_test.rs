//! Load testing for dispatch and broadcast.

use std::sync::Arc;
use std::time::{Duration, Instant};
use waypost::{FnRoute, Frame, Route, RouteMatch, WebSocketServerSettings};

mod common;

use common::Recorder;

#[tokio::test]
async fn test_load_performance() {
    // 1. Start server with one cheap route
    let route: Arc<dyn Route> = Arc::new(FnRoute::new("hello", RouteMatch::default(), |_req| async {
        "Hello from waypost"
    }));
    let (server, addr) = common::start_server(vec![route]).await;

    // 2. Run load
    let concurrency = 20;
    let requests_per_task = 50;
    let total_requests = concurrency * requests_per_task;

    let client = reqwest::Client::new();
    let start = Instant::now();

    let url = format!("http://{addr}/");
    let results = common::concurrently(concurrency, |_| {
        let client = client.clone();
        let url = url.clone();
        async move {
            let mut latencies = Vec::new();
            for _ in 0..requests_per_task {
                let req_start = Instant::now();
                if let Ok(res) = client.get(&url).send().await {
                    if res.status().is_success() {
                        latencies.push(req_start.elapsed());
                    }
                }
            }
            latencies
        }
    })
    .await;

    let duration = start.elapsed();
    let mut all_latencies: Vec<Duration> = results.into_iter().flatten().collect();
    assert_eq!(all_latencies.len(), total_requests, "some requests failed");

    all_latencies.sort();
    let p50 = all_latencies[all_latencies.len() / 2];
    let p99 = all_latencies[(all_latencies.len() as f64 * 0.99) as usize];

    println!("\n--- Load Test Results ---");
    println!("Total Requests: {}", total_requests);
    println!("Concurrency:    {}", concurrency);
    println!("Total Duration: {:?}", duration);
    println!("Requests/sec:   {:.2}", total_requests as f64 / duration.as_secs_f64());
    println!("P50 Latency:    {:?}", p50);
    println!("P99 Latency:    {:?}", p99);
    println!("-------------------------\n");

    server.stop().await;
}

#[tokio::test]
async fn test_broadcast_fan_out() {
    let (server, addr) = common::start_ws_server(WebSocketServerSettings::default(), Arc::new(Recorder::default())).await;

    let clients = 50;
    let mut sockets = Vec::with_capacity(clients);
    for _ in 0..clients {
        sockets.push(common::ws_connect(addr, "/ws").await);
    }
    assert!(common::wait_until(Duration::from_secs(5), || server.client_count() == clients).await);

    let start = Instant::now();
    let messages = 20;
    for i in 0..messages {
        assert_eq!(server.broadcast(&Frame::text(format!("msg-{i}"))).await, clients);
    }
    println!("Broadcast {messages} frames to {clients} clients in {:?}", start.elapsed());

    for socket in sockets.iter_mut() {
        for i in 0..messages {
            assert_eq!(common::next_text(socket).await, format!("msg-{i}"));
        }
    }

    server.stop().await;
}
