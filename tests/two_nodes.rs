//! Two-node scenarios over loopback TCP.

use std::collections::HashSet;
use std::time::Duration;

use biome_p2p::{identity, BiomeP2p, BiomeP2pConfig, BiomeP2pError, PeerId, DELIVERY_QUEUE_CAPACITY};
use tokio::time::{sleep, timeout};

const TOPIC: &str = "biome-test";
const PROTOCOL: &str = "/biome/direct/1.0.0";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

fn test_config() -> BiomeP2pConfig {
    BiomeP2pConfig {
        local_only: true,
        enable_mdns: false,
        ..BiomeP2pConfig::new(TOPIC).with_protocol(PROTOCOL)
    }
}

/// Full dialable address of a running node.
async fn dial_address(node: &BiomeP2p) -> String {
    let handle = node.handle();
    for _ in 0..50 {
        if let Some(addr) = handle.listen_addresses().await.unwrap().first() {
            return format!("{}/p2p/{}", addr, node.peer_id());
        }
        sleep(Duration::from_millis(100)).await;
    }
    panic!("node never started listening");
}

/// Starts two nodes, the second bootstrapping from the first.
async fn connected_pair() -> (BiomeP2p, BiomeP2p) {
    let a = BiomeP2p::start(test_config()).await.unwrap();
    let addr = dial_address(&a).await;
    let b = BiomeP2p::start(test_config().with_bootstrap_bundle(&addr))
        .await
        .unwrap();
    (a, b)
}

async fn wait_for_topic_peer(node: &BiomeP2p, peer: &PeerId) {
    let handle = node.handle();
    for _ in 0..100 {
        if handle.topic_peers(TOPIC).await.unwrap().contains(peer) {
            return;
        }
        sleep(Duration::from_millis(100)).await;
    }
    panic!("{} never saw {} on the topic", node.peer_id(), peer);
}

async fn wait_for_connection(node: &BiomeP2p, peer: &PeerId) {
    let handle = node.handle();
    for _ in 0..100 {
        if handle.connected_peers().await.unwrap().contains(peer) {
            return;
        }
        sleep(Duration::from_millis(100)).await;
    }
    panic!("{} never connected to {}", node.peer_id(), peer);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn supplied_key_fixes_peer_id() {
    init_tracing();

    let key = identity::generate_private_key().unwrap();
    let expected = identity::peer_id_from_private_key(&key).unwrap();

    let config = BiomeP2pConfig {
        private_key: Some(key),
        ..test_config()
    };
    let node = BiomeP2p::start(config).await.unwrap();
    assert_eq!(node.peer_id(), &expected);
    node.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn published_message_reaches_peer_but_not_publisher() {
    init_tracing();
    let (a, b) = connected_pair().await;
    wait_for_topic_peer(&a, b.peer_id()).await;
    wait_for_topic_peer(&b, a.peer_id()).await;
    // let the mesh settle after the first heartbeat
    sleep(Duration::from_millis(1500)).await;

    a.publish(b"hello".to_vec()).await.unwrap();

    let msg = timeout(Duration::from_secs(10), b.receive_pubsub())
        .await
        .expect("B should receive the message")
        .unwrap();
    assert_eq!(msg.data, b"hello");
    assert_eq!(&msg.sender, a.peer_id());
    assert_eq!(msg.topic.as_deref(), Some(TOPIC));

    sleep(Duration::from_millis(500)).await;
    assert_eq!(a.pubsub_inbox().unwrap().try_recv().unwrap(), None);

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn direct_message_arrives_once_without_terminator() {
    init_tracing();
    let (a, b) = connected_pair().await;
    wait_for_connection(&b, a.peer_id()).await;

    a.send_to(b.peer_id(), b"ping\n".to_vec()).await.unwrap();

    let msg = timeout(Duration::from_secs(10), b.receive_stream())
        .await
        .expect("B should receive the direct message")
        .unwrap();
    assert_eq!(msg.data, b"ping");
    assert_eq!(&msg.sender, a.peer_id());
    assert_eq!(msg.topic, None);

    sleep(Duration::from_millis(300)).await;
    assert_eq!(b.stream_inbox().unwrap().try_recv().unwrap(), None);

    // a missing terminator is appended by the sender
    b.send_to(a.peer_id(), b"pong".to_vec()).await.unwrap();
    let msg = timeout(Duration::from_secs(10), a.receive_stream())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.data, b"pong");

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn direct_sends_beyond_queue_capacity_all_arrive() {
    init_tracing();
    let (a, b) = connected_pair().await;
    wait_for_connection(&b, a.peer_id()).await;

    // A does not read while B overfills its queue
    let total = DELIVERY_QUEUE_CAPACITY + 72;
    for n in 0..total {
        b.send_to(a.peer_id(), format!("msg{}", n).into_bytes())
            .await
            .unwrap_or_else(|e| panic!("send {} failed: {}", n, e));
    }

    let mut received = HashSet::new();
    for _ in 0..total {
        let msg = timeout(Duration::from_secs(10), a.receive_stream())
            .await
            .expect("every sent message should arrive")
            .unwrap();
        assert_eq!(&msg.sender, b.peer_id());
        assert!(received.insert(msg.data_lossy()), "duplicate delivery");
    }
    let expected: HashSet<_> = (0..total).map(|n| format!("msg{}", n)).collect();
    assert_eq!(received, expected);

    sleep(Duration::from_millis(300)).await;
    assert_eq!(a.stream_inbox().unwrap().try_recv().unwrap(), None);

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn send_to_unreachable_peer_fails() {
    init_tracing();
    let node = BiomeP2p::start(test_config()).await.unwrap();
    let stranger = identity::peer_id_from_private_key(&identity::generate_private_key().unwrap())
        .unwrap();

    let result = timeout(Duration::from_secs(15), node.send_to(&stranger, b"hi".to_vec()))
        .await
        .unwrap();
    assert!(matches!(result, Err(BiomeP2pError::NetworkError(_))));

    node.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_closes_inboxes_and_handles() {
    init_tracing();
    let node = BiomeP2p::start(test_config()).await.unwrap();
    let pubsub = node.pubsub_inbox().unwrap();
    let stream = node.stream_inbox().unwrap();
    let handle = node.handle();

    let waiter = tokio::spawn(async move { pubsub.recv().await });
    node.shutdown().await.unwrap();

    let result = timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
    assert_eq!(result, Err(BiomeP2pError::ChannelClosed));
    assert_eq!(stream.recv().await, Err(BiomeP2pError::ChannelClosed));

    assert_eq!(handle.connected_peers().await, Err(BiomeP2pError::NotStarted));
    assert_eq!(
        handle.publish(TOPIC, b"late".to_vec()).await,
        Err(BiomeP2pError::NotStarted)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_operations_need_a_protocol() {
    init_tracing();
    let config = BiomeP2pConfig {
        protocol_name: None,
        ..test_config()
    };
    let node = BiomeP2p::start(config).await.unwrap();
    assert!(node.stream().is_none());

    let peer = node.peer_id().clone();
    assert_eq!(
        node.send_to(&peer, b"x".to_vec()).await,
        Err(BiomeP2pError::ProtocolNotConfigured)
    );
    assert_eq!(
        node.receive_stream().await,
        Err(BiomeP2pError::ProtocolNotConfigured)
    );
    assert_eq!(
        node.handle().send_to(&peer, b"x".to_vec()).await,
        Err(BiomeP2pError::ProtocolNotConfigured)
    );

    node.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn publishing_to_unjoined_topic_is_rejected() {
    init_tracing();
    let node = BiomeP2p::start(BiomeP2pConfig {
        topics: vec!["one".into(), "two".into()],
        ..test_config()
    })
    .await
    .unwrap();

    assert_eq!(node.topics().len(), 2);
    assert!(node.topic("two").is_some());
    node.topic("two").unwrap().publish(b"ok".to_vec()).await.unwrap();
    assert_eq!(
        node.handle().publish("three", b"x".to_vec()).await,
        Err(BiomeP2pError::TopicNotJoined("three".into()))
    );

    node.shutdown().await.unwrap();
}
