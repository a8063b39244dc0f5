//! End-to-end tests for swaplink-daemon.
//!
//! Runs real peers over loopback UDP sockets: raw request/response exchange,
//! timeouts, and whole peers joining and repairing an overlay.

use std::time::Duration;

use futures::future::join_all;
use swaplink_core::{
    LinkType, Node, Request, Response, Swaplink, SwaplinkConfig, Transport, TransportBinder,
    TransportError,
};
use swaplink_daemon::{UdpBinder, UdpTransport};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, timeout};

const TIMEOUT: Duration = Duration::from_millis(300);

async fn bind_local() -> (UdpTransport, swaplink_core::transport::InboundReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let transport = UdpBinder::new(TIMEOUT)
        .bind(&Node::new("127.0.0.1", 0), tx)
        .await
        .expect("Failed to bind loopback socket");
    (transport, rx)
}

fn fast_config() -> SwaplinkConfig {
    SwaplinkConfig {
        heartbeat_check_interval: Duration::from_millis(900),
        heartbeat_send_interval: Duration::from_millis(300),
        rpc_timeout: Duration::from_millis(200),
        ..SwaplinkConfig::with_address("127.0.0.1", 0)
    }
}

fn udp_peer() -> Swaplink<UdpBinder> {
    let config = fast_config();
    let binder = UdpBinder::new(config.rpc_timeout);
    Swaplink::new(config, binder)
}

// ============================================================================
// Transport
// ============================================================================

#[tokio::test]
async fn test_request_response_over_udp() {
    let (a, _a_rx) = bind_local().await;
    let (b, mut b_rx) = bind_local().await;
    let a_node = a.local_node();

    tokio::spawn(async move {
        let inbound = b_rx.recv().await.unwrap();
        assert_eq!(inbound.sender, a_node);
        let Request::RandomWalk { index, limit, .. } = inbound.request else {
            panic!("Expected random walk, got {:?}", inbound.request);
        };
        assert_eq!((index, limit), (2, 5));
        inbound
            .reply
            .send(Response::Node(Node::new("10.0.0.1", 9)))
            .unwrap();
    });

    let request = Request::random_walk(a.local_node(), 2, 5, LinkType::In);
    let response = a.send_request(&b.local_node(), request).await.unwrap();
    assert_eq!(response, Response::Node(Node::new("10.0.0.1", 9)));
}

#[tokio::test]
async fn test_concurrent_requests_matched_by_id() {
    let (a, _a_rx) = bind_local().await;
    let (b, mut b_rx) = bind_local().await;

    // Echo each walk's index back as the port of the answer
    tokio::spawn(async move {
        while let Some(inbound) = b_rx.recv().await {
            if let Request::RandomWalk { index, .. } = inbound.request {
                let _ = inbound
                    .reply
                    .send(Response::Node(Node::new("echo", index as u16)));
            }
        }
    });

    let target = b.local_node();
    let calls = (0..16u32).map(|i| {
        let request = Request::random_walk(a.local_node(), i, 10, LinkType::Out);
        let target = target.clone();
        let a = &a;
        async move { (i, a.send_request(&target, request).await) }
    });

    for (i, response) in join_all(calls).await {
        assert_eq!(response.unwrap(), Response::Node(Node::new("echo", i as u16)));
    }
}

#[tokio::test]
async fn test_unanswered_request_times_out() {
    let (a, _a_rx) = bind_local().await;
    // Inbound channel kept open but never drained
    let (b, _b_rx) = bind_local().await;

    let started = Instant::now();
    let result = a.send_request(&b.local_node(), Request::ImYourInNode).await;

    assert!(matches!(result, Err(TransportError::Timeout(_))));
    assert!(started.elapsed() >= TIMEOUT);
}

#[tokio::test]
async fn test_closed_peer_times_out() {
    let (a, _a_rx) = bind_local().await;
    let (b, _b_rx) = bind_local().await;
    let b_node = b.local_node();
    b.close().await;
    drop(b);

    let result = a.send_request(&b_node, Request::ImYourInNode).await;
    assert!(matches!(
        result,
        Err(TransportError::Timeout(_) | TransportError::Unreachable(_))
    ));
}

// ============================================================================
// Overlay
// ============================================================================

#[tokio::test]
async fn test_two_peers_join_over_udp() {
    let mut a = udp_peer();
    let mut b = udp_peer();

    a.join(1, Vec::new()).await.unwrap();
    assert_ne!(a.node().port(), 0);
    b.join(1, vec![a.node().clone()]).await.unwrap();

    assert_eq!(b.list_neighbours(None), vec![a.node().clone()]);
    assert_eq!(a.in_links(), vec![b.node().clone()]);

    a.leave().await;
    b.leave().await;
}

#[tokio::test]
async fn test_small_overlay_converges_over_udp() {
    let mut seed = udp_peer();
    seed.join(2, Vec::new()).await.unwrap();
    let entry = seed.node().clone();

    let mut rest: Vec<_> = (0..4).map(|_| udp_peer()).collect();
    for p in rest.iter_mut() {
        p.join(2, vec![entry.clone()]).await.unwrap();
    }
    let mut peers = vec![seed];
    peers.extend(rest);

    let deadline = Instant::now() + Duration::from_secs(20);
    let mut converged = false;
    while Instant::now() < deadline {
        if peers.iter().all(|p| p.list_neighbours(None).len() == 2) {
            converged = true;
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    assert!(converged, "out-degree never reached 2 on every peer");

    let sample = timeout(Duration::from_secs(2), peers[0].select()).await;
    if let Ok(Ok(node)) = sample {
        assert_ne!(&node, peers[0].node());
    }

    for p in peers.iter_mut() {
        p.leave().await;
    }
}
