//! Protocol bridge behavior on realistic output chunking

use grid::supervisor::{LineKind, OutputStream, ProtocolBridge};

const MARKER: &str = "HTTP endpoint opened";

#[test]
fn test_split_messages_reassemble_across_chunks() {
    let mut bridge = ProtocolBridge::new(MARKER);

    let first = bridge.feed(
        OutputStream::Stdout,
        br#"{"jsonrpc":"2.0","id":1,"method":"ui_approveTx","par"#,
    );
    assert!(first.is_empty());

    let second = bridge.feed(
        OutputStream::Stdout,
        b"ams\":[{}]}\nINFO [01-01|00:00:00] HTTP endpoint opened url=http://localhost:8550\n{\"id\":",
    );
    assert_eq!(second.len(), 2);
    match &second[0].kind {
        LineKind::Message(message) => {
            assert_eq!(message.method.as_deref(), Some("ui_approveTx"));
            assert_eq!(message.id, Some(serde_json::json!(1)));
        }
        other => panic!("expected message, got {other:?}"),
    }
    assert!(!second[0].ready);
    assert_eq!(second[1].kind, LineKind::Text);
    assert!(second[1].ready);

    let third = bridge.feed(OutputStream::Stdout, b"2,\"result\":true}\n");
    assert_eq!(third.len(), 1);
    assert!(matches!(third[0].kind, LineKind::Message(_)));
}

#[test]
fn test_streams_are_buffered_separately() {
    let mut bridge = ProtocolBridge::new(MARKER);

    assert!(bridge.feed(OutputStream::Stdout, b"{\"method\":").is_empty());
    let err = bridge.feed(OutputStream::Stderr, b"WARN disk almost full\n");
    assert_eq!(err.len(), 1);
    assert_eq!(err[0].stream, OutputStream::Stderr);
    assert_eq!(err[0].text, "WARN disk almost full");

    let out = bridge.feed(OutputStream::Stdout, b"\"ui_showInfo\"}\n");
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].text, r#"{"method":"ui_showInfo"}"#);
}

#[test]
fn test_malformed_json_and_trailing_partial_line() {
    let mut bridge = ProtocolBridge::new(MARKER);

    let lines = bridge.feed(OutputStream::Stdout, b"{not json}\r\n\n\nlast words");
    assert_eq!(lines.len(), 1);
    assert!(matches!(lines[0].kind, LineKind::Malformed(_)));

    let tail = bridge.finish(OutputStream::Stdout).unwrap();
    assert_eq!(tail.text, "last words");
    assert!(bridge.finish(OutputStream::Stdout).is_none());
}
