//! End-to-end scenarios driving a group the way an event loop would.

mod common;

use std::sync::{Arc, Mutex};

use common::MockTransport;
use wsgrid::{ConnId, ExtensionOptions, Group, GroupOptions, LoopId, OpCode, Role};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Message(Vec<u8>, OpCode),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Disconnection(u16, Vec<u8>),
}

type Events = Arc<Mutex<Vec<Event>>>;

/// A server group that records every handler invocation. Test frames are
/// written unmasked for readability, so masking enforcement is relaxed.
fn recording_group(options: GroupOptions) -> (Group<MockTransport>, Events) {
    let mut group = Group::new(LoopId(1), options).expect("valid options");
    let events: Events = Arc::new(Mutex::new(Vec::new()));

    let sink = events.clone();
    group.on_message(move |_conn, _ctx, data, opcode| {
        sink.lock().unwrap().push(Event::Message(data.to_vec(), opcode));
    });
    let sink = events.clone();
    group.on_ping(move |_conn, _ctx, data| {
        sink.lock().unwrap().push(Event::Ping(data.to_vec()));
    });
    let sink = events.clone();
    group.on_pong(move |_conn, _ctx, data| {
        sink.lock().unwrap().push(Event::Pong(data.to_vec()));
    });
    let sink = events.clone();
    group.on_disconnection(move |_conn, _ctx, code, reason| {
        sink.lock()
            .unwrap()
            .push(Event::Disconnection(code, reason.to_vec()));
    });

    (group, events)
}

fn unmasked_server() -> (Group<MockTransport>, Events, MockTransport, ConnId) {
    let (mut group, events) = recording_group(GroupOptions::new().accept_unmasked_frames(true));
    let transport = MockTransport::new();
    let id = group.attach(transport.clone(), Role::Server);
    (group, events, transport, id)
}

#[test]
fn test_echo_text_single_frame() {
    let (mut group, events, _transport, id) = unmasked_server();

    group.on_data(id, &[0x81, 0x05, 0x68, 0x65, 0x6c, 0x6c, 0x6f]);

    assert_eq!(
        events.lock().unwrap().as_slice(),
        &[Event::Message(b"hello".to_vec(), OpCode::Text)]
    );
    let conn = group.connection(id).expect("still linked");
    assert!(!conn.is_shutting_down());
    assert!(!conn.is_closed());
}

#[test]
fn test_fragmented_binary_reassembles() {
    let (mut group, events, _transport, id) = unmasked_server();

    group.on_data(id, &[0x02, 0x03, 0xAA, 0xBB, 0xCC]);
    assert!(events.lock().unwrap().is_empty());

    group.on_data(id, &[0x80, 0x02, 0xDD, 0xEE]);
    assert_eq!(
        events.lock().unwrap().as_slice(),
        &[Event::Message(
            vec![0xAA, 0xBB, 0xCC, 0xDD, 0xEE],
            OpCode::Binary
        )]
    );
}

#[test]
fn test_ping_interleaved_in_fragmented_text() {
    let (mut group, events, transport, id) = unmasked_server();

    group.on_data(id, &[0x01, 0x03, b'f', b'o', b'o']);
    group.on_data(id, &[0x89, 0x04, b'P', b'I', b'N', b'G']);
    group.on_data(id, &[0x80, 0x03, b'b', b'a', b'r']);

    assert_eq!(
        events.lock().unwrap().as_slice(),
        &[
            Event::Ping(b"PING".to_vec()),
            Event::Message(b"foobar".to_vec(), OpCode::Text),
        ]
    );

    // The pong echo carries the ping payload.
    assert_eq!(
        transport.written(),
        vec![0x8A, 0x04, b'P', b'I', b'N', b'G']
    );
}

#[test]
fn test_ping_split_across_reads_inside_fragmented_message() {
    let (mut group, events, transport, id) = unmasked_server();

    group.on_data(id, &[0x01, 0x03, b'f', b'o', b'o']);
    // Ping header and payload arrive in three pieces.
    group.on_data(id, &[0x89, 0x04, b'P', b'I']);
    assert!(events.lock().unwrap().is_empty());
    group.on_data(id, &[b'N']);
    group.on_data(id, &[b'G']);
    group.on_data(id, &[0x80, 0x03, b'b', b'a', b'r']);

    assert_eq!(
        events.lock().unwrap().as_slice(),
        &[
            Event::Ping(b"PING".to_vec()),
            Event::Message(b"foobar".to_vec(), OpCode::Text),
        ]
    );
    assert_eq!(
        transport.written(),
        vec![0x8A, 0x04, b'P', b'I', b'N', b'G']
    );
}

#[test]
fn test_close_sends_frame_and_fires_disconnection_once() {
    let (mut group, events, transport, id) = unmasked_server();

    group.close(id, 1001, b"bye");

    assert_eq!(
        transport.written(),
        vec![0x88, 0x05, 0x03, 0xE9, b'b', b'y', b'e']
    );
    assert_eq!(
        events.lock().unwrap().as_slice(),
        &[Event::Disconnection(1001, b"bye".to_vec())]
    );
    // The close frame flushed immediately, so the write side is shut down.
    assert_eq!(transport.shutdowns(), 1);

    let conn = group.connection(id).expect("awaiting peer close");
    assert!(conn.is_shutting_down());

    // A second close is a no-op.
    group.close(id, 1000, b"again");
    assert_eq!(events.lock().unwrap().len(), 1);
    assert_eq!(
        transport.written(),
        vec![0x88, 0x05, 0x03, 0xE9, b'b', b'y', b'e']
    );
}

#[test]
fn test_close_code_zero_defaults_to_normal() {
    let (mut group, events, transport, id) = unmasked_server();

    group.close(id, 0, b"");

    assert_eq!(transport.written(), vec![0x88, 0x02, 0x03, 0xE8]);
    assert_eq!(
        events.lock().unwrap().as_slice(),
        &[Event::Disconnection(1000, Vec::new())]
    );
}

#[test]
fn test_invalid_utf8_text_terminates() {
    let (mut group, events, transport, id) = unmasked_server();

    group.on_data(id, &[0x81, 0x02, 0xC3, 0x28]);

    assert_eq!(
        events.lock().unwrap().as_slice(),
        &[Event::Disconnection(1006, Vec::new())]
    );
    assert!(group.connection(id).is_none());
    assert!(transport.closed());
    // No close frame is sent on a protocol violation.
    assert!(transport.written().is_empty());
}

#[test]
fn test_handshake_accept_key() {
    let (mut group, _events) = recording_group(GroupOptions::new().server_identity("testsrv"));
    let transport = MockTransport::new();
    group
        .accept(transport.clone(), "dGhlIHNhbXBsZSBub25jZQ==", "", "chat, superchat")
        .expect("upgrade");

    let text = String::from_utf8(transport.written()).unwrap();
    assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    assert!(text.contains("Sec-WebSocket-Protocol: chat\r\n"));
    assert!(text.contains("Sec-WebSocket-Version: 13\r\n"));
    assert!(text.contains("WebSocket-Server: testsrv\r\n"));
    assert!(text.ends_with("\r\n\r\n"));
}

#[test]
fn test_peer_close_echoes_and_completes_on_eof() {
    let (mut group, events, transport, id) = unmasked_server();

    group.on_data(id, &[0x88, 0x02, 0x03, 0xE8]);

    // Echoed close with the same code, disconnection fired.
    assert_eq!(transport.written(), vec![0x88, 0x02, 0x03, 0xE8]);
    assert_eq!(
        events.lock().unwrap().as_slice(),
        &[Event::Disconnection(1000, Vec::new())]
    );
    assert!(group.connection(id).unwrap().is_shutting_down());

    // Peer closes the stream; terminal state, no second disconnection.
    group.on_eof(id);
    assert!(group.connection(id).is_none());
    assert_eq!(events.lock().unwrap().len(), 1);
}

#[test]
fn test_reserved_close_code_is_violation() {
    let (mut group, events, _transport, id) = unmasked_server();

    // 1005 must never appear on the wire.
    group.on_data(id, &[0x88, 0x02, 0x03, 0xED]);

    assert_eq!(
        events.lock().unwrap().as_slice(),
        &[Event::Disconnection(1006, Vec::new())]
    );
    assert!(group.connection(id).is_none());
}

#[test]
fn test_close_reason_with_invalid_utf8_is_violation() {
    let (mut group, events, _transport, id) = unmasked_server();

    group.on_data(id, &[0x88, 0x04, 0x03, 0xE8, 0xC3, 0x28]);

    assert_eq!(
        events.lock().unwrap().as_slice(),
        &[Event::Disconnection(1006, Vec::new())]
    );
}

#[test]
fn test_pong_clears_outstanding_flag() {
    let (mut group, events, _transport, id) = unmasked_server();

    group
        .connection_mut(id)
        .unwrap()
        .set_outstanding_pong(true);
    group.on_data(id, &[0x8A, 0x02, b'o', b'k']);

    assert_eq!(
        events.lock().unwrap().as_slice(),
        &[Event::Pong(b"ok".to_vec())]
    );
    assert!(!group.connection(id).unwrap().has_outstanding_pong());
}

#[test]
fn test_oversize_message_terminates() {
    let (mut group, events) = recording_group(
        GroupOptions::new()
            .accept_unmasked_frames(true)
            .max_payload(8),
    );
    let id = group.attach(MockTransport::new(), Role::Server);

    let mut frame = vec![0x82, 0x09];
    frame.extend_from_slice(&[0u8; 9]);
    group.on_data(id, &frame);

    assert_eq!(
        events.lock().unwrap().as_slice(),
        &[Event::Disconnection(1006, Vec::new())]
    );
    assert!(group.connection(id).is_none());
}

#[test]
fn test_oversize_fragmented_message_terminates() {
    let (mut group, events) = recording_group(
        GroupOptions::new()
            .accept_unmasked_frames(true)
            .max_payload(8),
    );
    let id = group.attach(MockTransport::new(), Role::Server);

    group.on_data(id, &[0x02, 0x05, 1, 2, 3, 4, 5]);
    group.on_data(id, &[0x80, 0x05, 6, 7, 8, 9, 10]);

    assert_eq!(
        events.lock().unwrap().as_slice(),
        &[Event::Disconnection(1006, Vec::new())]
    );
}

#[test]
fn test_queued_sends_cancel_fifo_on_terminate() {
    let (mut group, events, transport, id) = unmasked_server();
    transport.set_blocked(true);

    let order: Arc<Mutex<Vec<(&str, bool, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    for name in ["first", "second", "third"] {
        let sink = order.clone();
        group.send(
            id,
            name.as_bytes(),
            OpCode::Text,
            false,
            Some(Box::new(move |conn, cancelled| {
                sink.lock().unwrap().push((name, conn.is_none(), cancelled));
            })),
        );
    }
    assert!(order.lock().unwrap().is_empty());

    group.terminate(id);

    assert_eq!(
        order.lock().unwrap().as_slice(),
        &[
            ("first", true, true),
            ("second", true, true),
            ("third", true, true),
        ]
    );
    assert_eq!(
        events.lock().unwrap().as_slice(),
        &[Event::Disconnection(1006, Vec::new())]
    );
}

#[test]
fn test_writable_drains_queue_in_order() {
    let (mut group, _events, transport, id) = unmasked_server();
    transport.set_blocked(true);

    let completions: Arc<Mutex<Vec<&str>>> = Arc::new(Mutex::new(Vec::new()));
    for name in ["a", "b"] {
        let sink = completions.clone();
        group.send(
            id,
            name.as_bytes(),
            OpCode::Text,
            false,
            Some(Box::new(move |conn, cancelled| {
                assert!(conn.is_some());
                assert!(!cancelled);
                sink.lock().unwrap().push(name);
            })),
        );
    }

    transport.set_blocked(false);
    group.on_writable(id);

    assert_eq!(completions.lock().unwrap().as_slice(), &["a", "b"]);
    assert_eq!(
        transport.written(),
        vec![0x81, 0x01, b'a', 0x81, 0x01, b'b']
    );
}

#[test]
fn test_sends_from_handlers_coalesce_under_cork() {
    let (mut group, _events) = recording_group(GroupOptions::new().accept_unmasked_frames(true));
    group.on_message(|conn, ctx, data, opcode| {
        // Two replies per inbound message.
        let payload = data.to_vec();
        conn.send(ctx, &payload, opcode, false, None);
        conn.send(ctx, &payload, opcode, false, None);
    });

    let transport = MockTransport::new();
    let id = group.attach(transport.clone(), Role::Server);
    group.on_data(id, &[0x81, 0x02, b'h', b'i']);

    // Both echo frames landed, back to back, after the chunk was consumed.
    assert_eq!(
        transport.written(),
        vec![0x81, 0x02, b'h', b'i', 0x81, 0x02, b'h', b'i']
    );
}

#[test]
fn test_compressed_roundtrip_between_connections() {
    let deflate_options = GroupOptions::new().extensions(ExtensionOptions::PERMESSAGE_DEFLATE);

    // Client side compresses and masks.
    let mut client_group: Group<MockTransport> =
        Group::new(LoopId(1), deflate_options.clone()).unwrap();
    let client_transport = MockTransport::new();
    let client_id = client_group.attach(client_transport.clone(), Role::Client);

    let message = b"compress me, ".repeat(8);
    client_group.send(client_id, &message, OpCode::Text, true, None);

    let wire = client_transport.written();
    assert_eq!(wire[0] & 0x40, 0x40, "RSV1 set on the wire");
    assert_eq!(wire[1] & 0x80, 0x80, "client frames are masked");
    assert!(wire.len() < message.len(), "payload actually shrank");

    // Server side inflates.
    let (mut server_group, events) = recording_group(deflate_options);
    let server_id = server_group.attach(MockTransport::new(), Role::Server);
    server_group.on_data(server_id, &wire);

    assert_eq!(
        events.lock().unwrap().as_slice(),
        &[Event::Message(message, OpCode::Text)]
    );
}

#[test]
fn test_compress_flag_ignored_without_negotiation() {
    let (mut group, _events, transport, id) = unmasked_server();

    group.send(id, b"plain", OpCode::Text, true, None);

    let wire = transport.written();
    assert_eq!(wire[0], 0x81, "RSV1 must stay clear");
    assert_eq!(&wire[2..], b"plain");
}

#[test]
fn test_disconnection_precedes_transfer_and_dead_connections_stay_put() {
    let (mut source, events) = recording_group(GroupOptions::new().accept_unmasked_frames(true));
    let mut target: Group<MockTransport> = Group::new(
        LoopId(1),
        GroupOptions::new().extensions(ExtensionOptions::TRANSFERS),
    )
    .unwrap();

    let id = source.attach(MockTransport::new(), Role::Server);
    source.terminate(id);
    assert_eq!(
        events.lock().unwrap().as_slice(),
        &[Event::Disconnection(1006, Vec::new())]
    );

    // A dead connection cannot be transferred, so the transfer handler can
    // never observe it after its disconnection.
    let result = Group::transfer(&mut source, &mut target, id);
    assert!(result.is_err());
    assert!(target.is_empty());
}

#[test]
fn test_send_after_close_still_flushes_before_queue_drain() {
    // Messages queued before close complete first; the close frame follows
    // in FIFO order and only then is the write side shut down.
    let (mut group, _events, transport, id) = unmasked_server();
    transport.set_blocked(true);

    group.send(id, b"backlog", OpCode::Text, false, None);
    group.close(id, 1000, b"");
    assert_eq!(transport.shutdowns(), 0);

    transport.set_blocked(false);
    group.on_writable(id);

    let wire = transport.written();
    // "backlog" frame first, close frame last.
    assert_eq!(&wire[..9], &[0x81, 0x07, b'b', b'a', b'c', b'k', b'l', b'o', b'g']);
    assert_eq!(&wire[9..], &[0x88, 0x02, 0x03, 0xE8]);
    assert_eq!(transport.shutdowns(), 1);
}
