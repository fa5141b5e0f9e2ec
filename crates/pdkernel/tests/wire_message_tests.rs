//
// wire_message_tests.rs
//
// Copyright (C) 2026 Pandia Contributors. All rights reserved.
//
//

use pdkernel::connection_file::ConnectionInfo;
use pdkernel::error::KernelError;
use pdkernel::jupyter_messages;
use pdkernel::kernel_connection::KernelConnection;
use pdkernel::wire_message::{WireMessage, DELIMITER};
use pdshared::jupyter_message::JupyterMessage;
use serde_json::json;

fn connection_info(key: &str) -> ConnectionInfo {
    ConnectionInfo {
        transport: String::from("tcp"),
        ip: String::from("127.0.0.1"),
        shell_port: 9001,
        iopub_port: 9002,
        stdin_port: 9003,
        control_port: 9004,
        hb_port: 9005,
        signature_scheme: String::from("hmac-sha256"),
        key: key.to_string(),
        kernel_name: String::new(),
    }
}

fn signed_connection() -> KernelConnection {
    KernelConnection::from_connection_info(&connection_info("a1b2c3d4"), String::from("tester"))
        .expect("failed to build connection")
}

fn unsigned_connection() -> KernelConnection {
    KernelConnection::from_connection_info(&connection_info(""), String::from("tester"))
        .expect("failed to build connection")
}

fn sample_message(connection: &KernelConnection) -> JupyterMessage {
    JupyterMessage {
        header: jupyter_messages::fresh_header(connection, "execute_request"),
        parent_header: None,
        metadata: json!({}),
        content: json!({ "code": "1+1", "silent": false }),
        buffers: Vec::new(),
    }
}

#[test]
fn round_trip_preserves_message() {
    let connection = signed_connection();
    let message = sample_message(&connection);

    let wire = WireMessage::from_message(&message, vec![b"client".to_vec()], &connection)
        .expect("encode failed");
    let frames = wire.into_frames();

    let decoded = WireMessage::from_frames(frames)
        .expect("framing failed")
        .to_message(&connection)
        .expect("decode failed");

    assert_eq!(decoded.header.msg_id, message.header.msg_id);
    assert_eq!(decoded.header.msg_type, "execute_request");
    assert_eq!(decoded.header.session, connection.session_id);
    assert!(decoded.parent_header.is_none());
    assert_eq!(decoded.content["code"], "1+1");
}

#[test]
fn parent_header_survives_round_trip() {
    let connection = signed_connection();
    let parent = jupyter_messages::fresh_header(&connection, "execute_request");
    let reply = jupyter_messages::reply(
        &connection,
        "execute_reply",
        &parent,
        json!({ "status": "ok" }),
    );

    let frames = WireMessage::from_message(&reply, Vec::new(), &connection)
        .expect("encode failed")
        .into_frames();
    let decoded = WireMessage::from_frames(frames)
        .expect("framing failed")
        .to_message(&connection)
        .expect("decode failed");

    let decoded_parent = decoded.parent_header.expect("parent header missing");
    assert_eq!(decoded_parent.msg_id, parent.msg_id);
    assert_ne!(decoded.header.msg_id, parent.msg_id);
}

#[test]
fn tampered_content_is_dropped() {
    let connection = signed_connection();
    let message = sample_message(&connection);

    let mut frames = WireMessage::from_message(&message, Vec::new(), &connection)
        .expect("encode failed")
        .into_frames();

    // The content block is the last frame; replace it wholesale
    let last = frames.len() - 1;
    frames[last] = b"{\"code\": \"import os\"}".to_vec();

    let result = WireMessage::from_frames(frames)
        .expect("framing failed")
        .to_message(&connection);
    assert!(matches!(result, Err(KernelError::SignatureVerification)));
}

#[test]
fn garbage_signature_is_dropped() {
    let connection = signed_connection();
    let message = sample_message(&connection);

    let wire =
        WireMessage::from_message(&message, Vec::new(), &connection).expect("encode failed");
    let mut frames = wire.into_frames();
    frames[1] = b"not-even-hex".to_vec();

    let result = WireMessage::from_frames(frames)
        .expect("framing failed")
        .to_message(&connection);
    assert!(matches!(result, Err(KernelError::SignatureVerification)));
}

#[test]
fn missing_delimiter_is_malformed() {
    let frames = vec![b"id".to_vec(), b"{}".to_vec(), b"{}".to_vec()];
    let result = WireMessage::from_frames(frames);
    assert!(matches!(result, Err(KernelError::MalformedMessage(_))));
}

#[test]
fn short_frame_set_is_malformed() {
    let frames = vec![DELIMITER.to_vec(), b"".to_vec(), b"{}".to_vec()];
    let result = WireMessage::from_frames(frames);
    assert!(matches!(result, Err(KernelError::MalformedMessage(_))));
}

#[test]
fn unparseable_header_is_malformed() {
    let connection = unsigned_connection();
    let frames = vec![
        DELIMITER.to_vec(),
        Vec::new(), // empty signature, unsigned mode
        b"not json".to_vec(),
        b"{}".to_vec(),
        b"{}".to_vec(),
        b"{}".to_vec(),
    ];
    let result = WireMessage::from_frames(frames)
        .expect("framing failed")
        .to_message(&connection);
    assert!(matches!(result, Err(KernelError::MalformedMessage(_))));
}

#[test]
fn unsigned_mode_round_trips_without_signature() {
    let connection = unsigned_connection();
    let message = sample_message(&connection);

    let wire =
        WireMessage::from_message(&message, Vec::new(), &connection).expect("encode failed");
    assert!(wire.parts[0].is_empty(), "unsigned messages carry an empty signature");

    let decoded = WireMessage::from_frames(wire.into_frames())
        .expect("framing failed")
        .to_message(&connection)
        .expect("decode failed");
    assert_eq!(decoded.content["code"], "1+1");
}

#[test]
fn identities_are_preserved_for_routing() {
    let connection = signed_connection();
    let message = sample_message(&connection);
    let identities = vec![b"router-id".to_vec(), b"extra".to_vec()];

    let frames = WireMessage::from_message(&message, identities.clone(), &connection)
        .expect("encode failed")
        .into_frames();
    let wire = WireMessage::from_frames(frames).expect("framing failed");
    assert_eq!(wire.identities, identities);
}

#[test]
fn buffers_ride_outside_the_signed_region() {
    let connection = signed_connection();
    let mut message = sample_message(&connection);
    message.buffers = vec![vec![1u8, 2, 3], vec![4u8, 5]];

    let frames = WireMessage::from_message(&message, Vec::new(), &connection)
        .expect("encode failed")
        .into_frames();
    let decoded = WireMessage::from_frames(frames)
        .expect("framing failed")
        .to_message(&connection)
        .expect("decode failed");
    assert_eq!(decoded.buffers, message.buffers);
}
