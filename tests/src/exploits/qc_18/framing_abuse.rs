//! # Framing Abuse
//!
//! Malformed frames on an established connection. The node must close the
//! socket instead of buffering without bound or crashing its read loop.

#[cfg(test)]
mod tests {
    use crate::fixtures::{next_event, ping, running_node, NodeEvent, RawPeer};
    use qc_18_peer_connections::codec::DEFAULT_MAX_ENVELOPE_SIZE;
    use qc_18_peer_connections::{CloseReason, NetworkMessage, PROTOCOL_VERSION};

    const ATTACKER_PORT: u16 = 31_400;

    async fn next_disconnect(
        events: &mut tokio::sync::mpsc::UnboundedReceiver<NodeEvent>,
    ) -> CloseReason {
        loop {
            if let NodeEvent::Disconnected(_, reason) = next_event(events).await {
                return reason;
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_oversized_frame_header_closes_connection() {
        let (node, mut events) = running_node().await;
        let mut attacker = RawPeer::connect(&node.my_capability().unwrap(), ATTACKER_PORT).await;

        let announced = (DEFAULT_MAX_ENVELOPE_SIZE as u32).saturating_mul(4);
        attacker.write_frame(announced, &[0u8; 16]).await.unwrap();

        assert!(matches!(
            next_disconnect(&mut events).await,
            CloseReason::Exception(_)
        ));
        attacker.closed_by_node().await;
        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_garbage_frame_closes_connection() {
        let (node, mut events) = running_node().await;
        let mut attacker = RawPeer::connect(&node.my_capability().unwrap(), ATTACKER_PORT).await;

        let garbage = [0xFFu8; 12];
        attacker
            .write_frame(garbage.len() as u32, &garbage)
            .await
            .unwrap();

        assert!(matches!(
            next_disconnect(&mut events).await,
            CloseReason::Exception(_)
        ));
        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_foreign_protocol_version_closes_connection() {
        let (node, mut events) = running_node().await;
        let mut attacker = RawPeer::connect(&node.my_capability().unwrap(), ATTACKER_PORT).await;

        let mut envelope = attacker.next_envelope(ping(b"v2"));
        envelope.version = PROTOCOL_VERSION + 1;
        attacker.write(&envelope).await;

        match next_disconnect(&mut events).await {
            CloseReason::Exception(reason) => assert!(reason.to_lowercase().contains("version")),
            other => panic!("unexpected reason {:?}", other),
        }
        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_second_handshake_is_ignored() {
        let (node, mut events) = running_node().await;
        let mut attacker = RawPeer::connect(&node.my_capability().unwrap(), ATTACKER_PORT).await;

        let request = attacker.request.clone();
        attacker.write(&request).await;
        attacker.send(ping(b"after")).await;

        loop {
            match next_event(&mut events).await {
                NodeEvent::Message(_, message) => {
                    assert_eq!(message, ping(b"after"));
                    break;
                }
                NodeEvent::Connected(_) => {}
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(node.all_connections().len(), 1);
        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_byte_at_a_time_envelope_is_reassembled() {
        let (node, mut events) = running_node().await;
        let mut attacker = RawPeer::connect(&node.my_capability().unwrap(), ATTACKER_PORT).await;

        let envelope = attacker.next_envelope(ping(b"slowloris"));
        let body = envelope.to_bytes().unwrap();
        let mut frame = Vec::new();
        qc_18_peer_connections::codec::encode_varint(body.len() as u32, &mut frame);
        frame.extend_from_slice(&body);

        for byte in &frame {
            attacker.write_raw(std::slice::from_ref(byte)).await.unwrap();
            tokio::task::yield_now().await;
        }

        loop {
            if let NodeEvent::Message(_, message) = next_event(&mut events).await {
                assert_eq!(message, ping(b"slowloris"));
                break;
            }
        }
        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_graceful_close_message_is_honored() {
        let (node, mut events) = running_node().await;
        let mut attacker = RawPeer::connect(&node.my_capability().unwrap(), ATTACKER_PORT).await;

        attacker
            .send(NetworkMessage::CloseConnection {
                reason: CloseReason::LocalInitiated,
            })
            .await;

        assert_eq!(
            next_disconnect(&mut events).await,
            CloseReason::CloseMessageReceived
        );
        node.shutdown().await;
    }
}
