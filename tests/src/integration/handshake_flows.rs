//! # Handshake Flows
//!
//! Many clients dial one node at once. Clients with a token bound to the
//! node's address each get exactly one response; clients whose token names
//! some other receiver are dropped without a byte in return.
//!
//! ```text
//! client ×5 ──Request(token → node)────► node ──Response──► client   (1 envelope)
//! client ×5 ──Request(token → other)───► node ──close────► client   (0 envelopes)
//! ```

#[cfg(test)]
mod tests {
    use futures::future::join_all;

    use crate::fixtures::{dial, handshake_initiator, next_event, running_node, NodeEvent};
    use qc_18_peer_connections::{Address, ConnectionError, NetworkEnvelope, NetworkLoad};

    const CLIENTS: u16 = 5;
    const FIRST_CLIENT_PORT: u16 = 20_000;

    /// Dial, send one request bound to `receiver` and collect whatever comes
    /// back before the node closes or answers.
    async fn handshake(
        node: &Address,
        my_port: u16,
        receiver: &Address,
    ) -> (Vec<NetworkEnvelope>, bool) {
        let mut channel = dial(node).await;
        let initiator = handshake_initiator(my_port, receiver);
        channel
            .write_envelope(&initiator.initiate().unwrap())
            .await
            .unwrap();

        match channel.read_envelopes().await {
            Ok(envelopes) => {
                let valid = envelopes.len() == 1 && initiator.finish(&envelopes[0]).is_ok();
                (envelopes, valid)
            }
            Err(ConnectionError::ConnectionClosed) | Err(ConnectionError::Io(_)) => {
                (Vec::new(), false)
            }
            Err(e) => panic!("unexpected read error {:?}", e),
        }
    }

    // =========================================================================
    // CONCURRENT CLIENTS
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_valid_clients_each_get_one_response() {
        let (node, mut events) = running_node().await;
        let node_address = node.my_capability().unwrap().address().clone();

        let results = join_all((0..CLIENTS).map(|i| {
            let node_address = node_address.clone();
            async move { handshake(&node_address, FIRST_CLIENT_PORT + i, &node_address).await }
        }))
        .await;

        for (envelopes, valid) in &results {
            assert_eq!(envelopes.len(), 1);
            assert!(valid);
        }

        let mut connected = 0;
        while connected < CLIENTS {
            match next_event(&mut events).await {
                NodeEvent::Connected(_) => connected += 1,
                // Clients hang up right after the handshake
                NodeEvent::Disconnected(..) => {}
                other => panic!("unexpected event {:?}", other),
            }
        }
        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_clients_with_wrong_receiver_get_nothing() {
        let (node, _events) = running_node().await;
        let node_address = node.my_capability().unwrap().address().clone();
        let elsewhere = node_address.with_port(node_address.port().wrapping_add(1));

        let results = join_all((0..CLIENTS).map(|i| {
            let node_address = node_address.clone();
            let elsewhere = elsewhere.clone();
            async move { handshake(&node_address, FIRST_CLIENT_PORT + i, &elsewhere).await }
        }))
        .await;

        for (envelopes, valid) in &results {
            assert!(envelopes.is_empty());
            assert!(!valid);
        }
        assert!(node.all_connections().is_empty());
        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mixed_clients_are_handled_independently() {
        let (node, _events) = running_node().await;
        let node_address = node.my_capability().unwrap().address().clone();
        let elsewhere = Address::localhost(1);

        let results = join_all((0..CLIENTS * 2).map(|i| {
            let node_address = node_address.clone();
            let receiver = if i % 2 == 0 {
                node_address.clone()
            } else {
                elsewhere.clone()
            };
            async move { handshake(&node_address, FIRST_CLIENT_PORT + i, &receiver).await }
        }))
        .await;

        let accepted = results.iter().filter(|(_, valid)| *valid).count();
        let silent = results.iter().filter(|(e, _)| e.is_empty()).count();
        assert_eq!(accepted, CLIENTS as usize);
        assert_eq!(silent, CLIENTS as usize);
        node.shutdown().await;
    }

    // =========================================================================
    // RESPONSE CONTENT
    // =========================================================================

    #[tokio::test]
    async fn test_response_carries_node_capability_and_load() {
        let (node, _events) = running_node().await;
        let capability = node.my_capability().unwrap();

        let mut channel = dial(capability.address()).await;
        let initiator = handshake_initiator(FIRST_CLIENT_PORT, capability.address());
        channel
            .write_envelope(&initiator.initiate().unwrap())
            .await
            .unwrap();
        let envelopes = channel.read_envelopes().await.unwrap();
        let response = initiator.finish(&envelopes[0]).unwrap();

        assert_eq!(response.capability, capability);
        assert_eq!(response.network_load, node.network_load());
        assert_eq!(response.network_load.load(), NetworkLoad::INITIAL.load());
        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_socket_accepted_before_shutdown_never_connects() {
        let (node, mut events) = running_node().await;
        let address = node.my_capability().unwrap().address().clone();

        let mut channel = dial(&address).await;
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        node.shutdown().await;

        let initiator = handshake_initiator(20_500, &address);
        let _ = channel.write_envelope(&initiator.initiate().unwrap()).await;
        assert!(matches!(
            channel.read_envelopes().await,
            Err(ConnectionError::ConnectionClosed) | Err(ConnectionError::Io(_))
        ));
        assert!(node.all_connections().is_empty());

        while let Ok(event) = events.try_recv() {
            assert!(
                !matches!(event, NodeEvent::Connected(_)),
                "unexpected {:?}",
                event
            );
        }
    }
}
