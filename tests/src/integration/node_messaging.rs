//! # Node-to-Node Messaging
//!
//! Two or more full nodes on ephemeral ports: dialing, delivery order,
//! request dedup and shutdown propagation.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::future::join_all;
    use parking_lot::Mutex;

    use crate::fixtures::{next_event, ping, running_node, start_node, NodeEvent};
    use qc_18_peer_connections::{
        CloseReason, Connection, InMemoryBanList, NetworkId, NetworkMessage, Node, NodeConfig,
        NodeListener,
    };

    const MESSAGES: usize = 50;

    // =========================================================================
    // DELIVERY
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_messages_arrive_in_send_order() {
        let (alice, _alice_events) = running_node().await;
        let (bob, mut bob_events) = running_node().await;
        let bob_capability = bob.my_capability().unwrap();

        for i in 0..MESSAGES {
            alice
                .send(ping(&(i as u32).to_be_bytes()), &bob_capability)
                .await
                .unwrap();
        }

        let mut received = Vec::new();
        while received.len() < MESSAGES {
            match next_event(&mut bob_events).await {
                NodeEvent::Message(_, message) => received.push(message),
                NodeEvent::Connected(_) => {}
                other => panic!("unexpected event {:?}", other),
            }
        }
        let expected: Vec<NetworkMessage> = (0..MESSAGES)
            .map(|i| ping(&(i as u32).to_be_bytes()))
            .collect();
        assert_eq!(received, expected);

        let connection = alice.find_connection(bob_capability.address()).unwrap();
        let metrics = connection.metrics();
        assert!(metrics.sent_messages >= MESSAGES as u64);
        assert!(metrics.sent_bytes > 0);

        alice.shutdown().await;
        bob.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ping_pong_over_one_connection() {
        let (alice, mut alice_events) = running_node().await;
        let (bob, mut bob_events) = running_node().await;
        let alice_capability = alice.my_capability().unwrap();
        let bob_capability = bob.my_capability().unwrap();

        alice.send(ping(b"ping"), &bob_capability).await.unwrap();
        loop {
            if let NodeEvent::Message(from, message) = next_event(&mut bob_events).await {
                assert_eq!(&from, alice_capability.address());
                assert_eq!(message, ping(b"ping"));
                break;
            }
        }

        bob.send(ping(b"pong"), &alice_capability).await.unwrap();
        loop {
            if let NodeEvent::Message(from, message) = next_event(&mut alice_events).await {
                assert_eq!(&from, bob_capability.address());
                assert_eq!(message, ping(b"pong"));
                break;
            }
        }

        assert_eq!(alice.all_connections().len(), 1);
        assert_eq!(bob.all_connections().len(), 1);
        alice.shutdown().await;
        bob.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_dials_are_deduplicated() {
        let (alice, _alice_events) = running_node().await;
        let (bob, _bob_events) = running_node().await;
        let bob_capability = bob.my_capability().unwrap();

        let connections = join_all((0..8).map(|_| {
            let alice = alice.clone();
            let bob_capability = bob_capability.clone();
            async move { alice.get_or_create_connection(&bob_capability).await }
        }))
        .await;

        let first = connections[0].as_ref().unwrap().clone();
        for connection in &connections {
            assert_eq!(connection.as_ref().unwrap(), &first);
        }
        assert_eq!(bob.all_connections().len(), 1);

        alice.shutdown().await;
        bob.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_full_mesh_of_three_nodes() {
        let mut nodes = Vec::new();
        for _ in 0..3 {
            nodes.push(running_node().await);
        }
        let capabilities: Vec<_> = nodes
            .iter()
            .map(|(node, _)| node.my_capability().unwrap())
            .collect();

        // Every node greets every node with a higher index
        for (i, (node, _)) in nodes.iter().enumerate() {
            for capability in &capabilities[i + 1..] {
                node.send(ping(&[i as u8]), capability).await.unwrap();
            }
        }

        for (j, (_, events)) in nodes.iter_mut().enumerate() {
            let mut greetings = 0;
            while greetings < j {
                if let NodeEvent::Message(..) = next_event(events).await {
                    greetings += 1;
                }
            }
        }
        for (node, _) in &nodes {
            assert_eq!(node.all_connections().len(), 2);
        }

        for (node, _) in &nodes {
            node.shutdown().await;
        }
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shutdown_reaches_remote_listener() {
        let (alice, mut alice_events) = running_node().await;
        let (bob, mut bob_events) = running_node().await;
        let alice_capability = alice.my_capability().unwrap();
        let bob_capability = bob.my_capability().unwrap();

        alice.get_or_create_connection(&bob_capability).await.unwrap();
        assert!(matches!(next_event(&mut bob_events).await, NodeEvent::Connected(_)));

        bob.shutdown().await;
        assert_eq!(next_event(&mut bob_events).await, NodeEvent::Disconnected(
            alice_capability.address().clone(),
            CloseReason::Shutdown
        ));
        assert_eq!(next_event(&mut bob_events).await, NodeEvent::Shutdown);

        loop {
            match next_event(&mut alice_events).await {
                NodeEvent::Disconnected(from, reason) => {
                    assert_eq!(&from, bob_capability.address());
                    assert_eq!(reason, CloseReason::CloseMessageReceived);
                    break;
                }
                NodeEvent::Connected(_) => {}
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(alice.all_connections().is_empty());
        alice.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_banned_peer_cannot_connect() {
        let ban_list = Arc::new(InMemoryBanList::new());
        let (bob, _bob_events) = start_node(Node::with_ban_list(
            NodeConfig::for_testing(),
            ban_list.clone(),
        ))
        .await;
        let (alice, _alice_events) = running_node().await;
        ban_list.ban(alice.my_capability().unwrap().address().clone());

        let result = alice
            .get_or_create_connection(&bob.my_capability().unwrap())
            .await;
        assert!(result.is_err());
        assert!(bob.all_connections().is_empty());

        alice.shutdown().await;
        bob.shutdown().await;
    }

    /// Records connection peers; removed halfway through the test.
    struct CountingListener {
        seen: Mutex<Vec<String>>,
    }

    impl NodeListener for CountingListener {
        fn on_message(&self, message: &NetworkMessage, connection: &Connection, _network_id: &NetworkId) {
            self.seen.lock().push(message.kind().to_string());
        }

        fn on_connection(&self, _connection: &Connection) {}

        fn on_disconnect(&self, _connection: &Connection, _close_reason: &CloseReason) {}
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_removed_listener_stops_receiving() {
        let (alice, _alice_events) = running_node().await;
        let (bob, mut bob_events) = running_node().await;
        let bob_capability = bob.my_capability().unwrap();

        let counting = Arc::new(CountingListener {
            seen: Mutex::new(Vec::new()),
        });
        let listener: Arc<dyn NodeListener> = counting.clone();
        bob.add_listener(Arc::clone(&listener));

        alice.send(ping(b"first"), &bob_capability).await.unwrap();
        while !matches!(next_event(&mut bob_events).await, NodeEvent::Message(..)) {}
        assert_eq!(counting.seen.lock().len(), 1);

        assert!(bob.remove_listener(&listener));
        alice.send(ping(b"second"), &bob_capability).await.unwrap();
        while !matches!(next_event(&mut bob_events).await, NodeEvent::Message(..)) {}
        assert_eq!(counting.seen.lock().len(), 1);

        alice.shutdown().await;
        bob.shutdown().await;
    }
}
