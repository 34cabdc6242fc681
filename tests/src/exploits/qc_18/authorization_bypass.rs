//! # Authorization Bypass Attempts
//!
//! Every post-handshake envelope must carry a fresh proof of work bound to
//! this node, this payload and a counter the node has not seen yet.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::fixtures::{dial, handshake_initiator, next_event, ping, running_node, start_node, NodeEvent, RawPeer};
    use qc_18_peer_connections::{
        Address, CloseReason, ConnectionError, InMemoryBanList, NetworkEnvelope, Node, NodeConfig,
    };

    const ATTACKER_PORT: u16 = 31_337;
    const HONEST_PORT: u16 = 31_338;

    /// Wait until the node reports `peer` gone and return the reason.
    async fn disconnect_reason(
        events: &mut tokio::sync::mpsc::UnboundedReceiver<NodeEvent>,
        peer: &Address,
    ) -> CloseReason {
        loop {
            if let NodeEvent::Disconnected(from, reason) = next_event(events).await {
                if &from == peer {
                    return reason;
                }
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_replayed_envelope_is_rejected() {
        let (node, mut events) = running_node().await;
        let mut attacker = RawPeer::connect(&node.my_capability().unwrap(), ATTACKER_PORT).await;

        let envelope = attacker.next_envelope(ping(b"pay 10"));
        attacker.write(&envelope).await;
        loop {
            if let NodeEvent::Message(_, message) = next_event(&mut events).await {
                assert_eq!(message, ping(b"pay 10"));
                break;
            }
        }

        // Same bytes again
        attacker.write(&envelope).await;
        assert_eq!(
            disconnect_reason(&mut events, attacker.address()).await,
            CloseReason::Unauthorized
        );
        attacker.closed_by_node().await;
        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_counter_going_backwards_is_rejected() {
        let (node, mut events) = running_node().await;
        let mut attacker = RawPeer::connect(&node.my_capability().unwrap(), ATTACKER_PORT).await;
        let receiver = attacker.response.capability.address().clone();

        let later = attacker.envelope(ping(b"five"), &receiver, 5);
        let earlier = attacker.envelope(ping(b"four"), &receiver, 4);
        attacker.write(&later).await;
        attacker.write(&earlier).await;

        assert_eq!(
            disconnect_reason(&mut events, attacker.address()).await,
            CloseReason::Unauthorized
        );
        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_token_for_another_receiver_is_rejected() {
        let (node, mut events) = running_node().await;
        let mut attacker = RawPeer::connect(&node.my_capability().unwrap(), ATTACKER_PORT).await;

        // Proof of work computed for some other node
        let stolen = attacker.envelope(ping(b"hello"), &Address::localhost(1), 1);
        attacker.write(&stolen).await;

        assert_eq!(
            disconnect_reason(&mut events, attacker.address()).await,
            CloseReason::Unauthorized
        );
        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_token_reused_for_other_payload_is_rejected() {
        let (node, mut events) = running_node().await;
        let mut attacker = RawPeer::connect(&node.my_capability().unwrap(), ATTACKER_PORT).await;

        let paid = attacker.next_envelope(ping(b"small"));
        let forged = NetworkEnvelope::new(paid.authorization_token, ping(b"much larger payload"));
        attacker.write(&forged).await;

        assert_eq!(
            disconnect_reason(&mut events, attacker.address()).await,
            CloseReason::Unauthorized
        );
        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_honest_peer_unaffected_by_attacker() {
        let (node, mut events) = running_node().await;
        let capability = node.my_capability().unwrap();
        let mut attacker = RawPeer::connect(&capability, ATTACKER_PORT).await;
        let mut honest = RawPeer::connect(&capability, HONEST_PORT).await;

        let stolen = attacker.envelope(ping(b"x"), &Address::localhost(1), 1);
        attacker.write(&stolen).await;
        assert_eq!(
            disconnect_reason(&mut events, attacker.address()).await,
            CloseReason::Unauthorized
        );

        honest.send(ping(b"still here")).await;
        loop {
            if let NodeEvent::Message(from, message) = next_event(&mut events).await {
                assert_eq!(&from, honest.address());
                assert_eq!(message, ping(b"still here"));
                break;
            }
        }
        assert_eq!(node.all_connections().len(), 1);
        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_quarantined_address_gets_no_response() {
        let ban_list = Arc::new(InMemoryBanList::new());
        ban_list.ban(Address::localhost(ATTACKER_PORT));
        let (node, _events) = start_node(Node::with_ban_list(
            NodeConfig::for_testing(),
            ban_list.clone(),
        ))
        .await;
        let address = node.my_capability().unwrap().address().clone();

        let mut channel = dial(&address).await;
        let initiator = handshake_initiator(ATTACKER_PORT, &address);
        channel
            .write_envelope(&initiator.initiate().unwrap())
            .await
            .unwrap();
        assert!(matches!(
            channel.read_envelopes().await,
            Err(ConnectionError::ConnectionClosed) | Err(ConnectionError::Io(_))
        ));

        // Lifting the ban lets the same address in
        ban_list.unban(&Address::localhost(ATTACKER_PORT));
        RawPeer::connect(&node.my_capability().unwrap(), ATTACKER_PORT).await;
        node.shutdown().await;
    }
}
