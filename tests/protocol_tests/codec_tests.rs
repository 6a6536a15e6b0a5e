//! Codec Tests
//!
//! Tests for command framing and reply encoding.

use bytes::BytesMut;
use corvid::protocol::{
    cmd, encode_command, encode_value, pack_commands, write_command, write_value,
    Cmd, Parser, ReplyError, Value,
};

// =============================================================================
// Command Encoding Tests
// =============================================================================

#[test]
fn test_wire_format_get() {
    let mut buf = Vec::new();
    write_command(&mut buf, &cmd("GET").arg("hello")).unwrap();
    assert_eq!(buf, b"*2\r\n$3\r\nGET\r\n$5\r\nhello\r\n");
}

#[test]
fn test_numeric_arguments_are_decimal_text() {
    let command = cmd("EXPIRE").arg("k").arg(30).arg(-1i64).arg(1.5);
    let mut buf = BytesMut::new();
    encode_command(command.as_args(), &mut buf);
    assert_eq!(
        &buf[..],
        b"*5\r\n$6\r\nEXPIRE\r\n$1\r\nk\r\n$2\r\n30\r\n$2\r\n-1\r\n$3\r\n1.5\r\n"
    );
}

#[test]
fn test_binary_argument_needs_no_escaping() {
    let value = vec![0u8, b'\r', b'\n', 0xFF, b'*'];
    let mut buf = BytesMut::new();
    encode_command(cmd("SET").arg("k").arg(&value).as_args(), &mut buf);

    let mut expected = b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$5\r\n".to_vec();
    expected.extend_from_slice(&value);
    expected.extend_from_slice(b"\r\n");
    assert_eq!(&buf[..], &expected[..]);
}

#[test]
fn test_pack_commands_is_concatenation() {
    let commands = vec![cmd("PING"), cmd("GET").arg("a"), cmd("INCR").arg("n")];
    let packed = pack_commands(&commands);

    let mut expected = BytesMut::new();
    for command in &commands {
        encode_command(command.as_args(), &mut expected);
    }
    assert_eq!(packed, expected);
}

#[test]
fn test_command_name_is_uppercased() {
    let command = Cmd::new("script").arg("load").arg("return 1");
    assert_eq!(command.name(), "SCRIPT");
    assert_eq!(command.subcommand().as_deref(), Some("LOAD"));
    assert_eq!(command.params().len(), 2);
}

// =============================================================================
// Reply Encoding Tests
// =============================================================================

#[test]
fn test_encode_scalars() {
    let cases: Vec<(Value, &[u8])> = vec![
        (Value::simple("OK"), &b"+OK\r\n"[..]),
        (Value::Integer(-7), &b":-7\r\n"[..]),
        (Value::bulk("hi"), &b"$2\r\nhi\r\n"[..]),
        (Value::Nil, &b"$-1\r\n"[..]),
        (Value::Error(ReplyError::new("ERR boom")), &b"-ERR boom\r\n"[..]),
    ];
    for (value, wire) in cases {
        let mut buf = BytesMut::new();
        encode_value(&value, &mut buf);
        assert_eq!(&buf[..], wire, "{:?}", value);
    }
}

#[test]
fn test_encode_nested_array() {
    let value = Value::Array(vec![
        Value::bulk("0"),
        Value::Array(vec![Value::bulk("a"), Value::Array(vec![])]),
    ]);
    let mut buf = Vec::new();
    write_value(&mut buf, &value).unwrap();
    assert_eq!(buf, b"*2\r\n$1\r\n0\r\n*2\r\n$1\r\na\r\n*0\r\n");
}

#[test]
fn test_encoded_reply_decodes_back() {
    let value = Value::Array(vec![
        Value::Integer(1),
        Value::Nil,
        Value::Error(ReplyError::new("WRONGTYPE Operation against a key")),
    ]);
    let mut buf = BytesMut::new();
    encode_value(&value, &mut buf);

    let mut parser = Parser::new();
    parser.feed(&buf);
    assert_eq!(parser.decode().unwrap(), Some(value));
    assert_eq!(parser.buffered(), 0);
}
