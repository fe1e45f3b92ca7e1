use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tungstenite::protocol::Message as WsMessage;

use super::{Connection, HandshakeState};
use crate::transport::message::{CLOSE_HANDSHAKE_TIMEOUT, CLOSE_UNAUTHORIZED, ServerMessage};
use crate::utils::GatewayError;

fn connection() -> (Connection, mpsc::UnboundedReceiver<WsMessage>) {
    let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
    (Connection::new(tx, CancellationToken::new(), Some("fan-7".into())), rx)
}

#[test]
fn test_connection_new() {
    let (conn, _rx) = connection();
    assert!(!conn.id.is_nil());
    assert_eq!(conn.subject.as_deref(), Some("fan-7"));
    assert!(conn.topics().is_empty());
    assert_eq!(conn.handshake_state(), HandshakeState::Pending);
    assert!(!conn.is_closed());
}

#[test]
fn send_serializes_server_messages() {
    let (conn, mut rx) = connection();
    conn.send(&ServerMessage::Ready).unwrap();

    match rx.try_recv().unwrap() {
        WsMessage::Text(text) => assert_eq!(text.as_str(), r#"{"type":"ready"}"#),
        other => panic!("Expected a text message, got {other:?}"),
    }
}

#[test]
fn send_fails_once_writer_is_gone() {
    let (conn, rx) = connection();
    drop(rx);

    let err = conn.send(&ServerMessage::Ready).unwrap_err();
    assert!(matches!(err, GatewayError::DeadPeer(_)));
}

#[test]
fn send_fails_after_terminate() {
    let (conn, _rx) = connection();
    conn.terminate();

    assert!(conn.is_closed());
    assert!(matches!(
        conn.send(&ServerMessage::Ready),
        Err(GatewayError::DeadPeer(_))
    ));
}

#[test]
fn handshake_settles_exactly_once() {
    let (conn, _rx) = connection();
    assert!(conn.complete_handshake());
    assert!(!conn.expire_handshake());
    assert!(!conn.complete_handshake());
    assert_eq!(conn.handshake_state(), HandshakeState::Ready);

    let (late, _rx) = connection();
    assert!(late.expire_handshake());
    assert!(!late.complete_handshake());
    assert_eq!(late.handshake_state(), HandshakeState::TimedOut);
}

#[test]
fn liveness_flag_is_cleared_by_take() {
    let (conn, _rx) = connection();
    assert!(conn.take_alive());
    assert!(!conn.take_alive());
    conn.mark_alive();
    assert!(conn.take_alive());
}

#[test]
fn close_with_uses_error_close_code() {
    let (conn, mut rx) = connection();
    conn.close_with(&GatewayError::AuthFailure("no token".into()));

    match rx.try_recv().unwrap() {
        WsMessage::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), CLOSE_UNAUTHORIZED);
            assert_eq!(frame.reason.as_str(), "unauthorized");
        }
        other => panic!("Expected a close frame, got {other:?}"),
    }

    let (conn, mut rx) = connection();
    conn.close_with(&GatewayError::HandshakeTimeout);
    match rx.try_recv().unwrap() {
        WsMessage::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), CLOSE_HANDSHAKE_TIMEOUT);
            assert_eq!(frame.reason.as_str(), "handshake timeout");
        }
        other => panic!("Expected a close frame, got {other:?}"),
    }
}

#[test]
fn close_with_other_errors_terminates() {
    let (conn, mut rx) = connection();
    conn.close_with(&GatewayError::DeadPeer("gone".into()));
    assert!(conn.is_closed());
    assert!(rx.try_recv().is_err());
}

#[test]
fn topic_set_enforces_uniqueness() {
    let (conn, _rx) = connection();
    assert!(conn.add_topic("match:42"));
    assert!(!conn.add_topic("match:42"));
    assert!(conn.is_subscribed("match:42"));
    assert_eq!(conn.drain_topics(), vec!["match:42".to_string()]);
    assert!(conn.topics().is_empty());
}
