// JDWP packet framing and error codes
//
// Reference: https://docs.oracle.com/javase/8/docs/platform/jpda/jdwp/jdwp-protocol.html

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

// All multi-byte values on the wire are big-endian.

pub type JdwpResult<T> = Result<T, JdwpError>;

#[derive(Debug, Error)]
pub enum JdwpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid handshake")]
    InvalidHandshake,

    #[error("JDWP error code {0}: {1}")]
    JdwpErrorCode(u16, String),

    #[error("Unsupported ID sizes reported by VM: {0}")]
    UnsupportedIdSizes(String),

    #[error("Connection closed")]
    ConnectionClosed,
}

impl JdwpError {
    /// The JDWP error code carried by a failed reply, if any
    pub fn code(&self) -> Option<u16> {
        match self {
            JdwpError::JdwpErrorCode(code, _) => Some(*code),
            _ => None,
        }
    }

    pub fn is_disconnect(&self) -> bool {
        match self {
            JdwpError::ConnectionClosed => true,
            JdwpError::JdwpErrorCode(code, _) => *code == error_codes::VM_DEAD,
            JdwpError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

pub const JDWP_HANDSHAKE: &[u8] = b"JDWP-Handshake";

// Packet layout:
// length (4) - includes header
// id (4)
// flags (1) - 0x00 = command, 0x80 = reply
// [command: command set (1) + command (1)] | [reply: error code (2)]
// data

pub const HEADER_SIZE: usize = 11;
pub const REPLY_FLAG: u8 = 0x80;

/// Error codes the client reacts to explicitly
pub mod error_codes {
    pub const INVALID_THREAD: u16 = 10;
    pub const THREAD_NOT_SUSPENDED: u16 = 13;
    pub const THREAD_NOT_ALIVE: u16 = 15;
    pub const INVALID_OBJECT: u16 = 20;
    pub const INVALID_CLASS: u16 = 21;
    pub const CLASS_NOT_PREPARED: u16 = 22;
    pub const INVALID_FRAMEID: u16 = 30;
    pub const NOT_FOUND: u16 = 41;
    pub const ABSENT_INFORMATION: u16 = 101;
    pub const VM_DEAD: u16 = 112;
}

#[derive(Debug, Clone)]
pub struct CommandPacket {
    pub id: u32,
    pub command_set: u8,
    pub command: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ReplyPacket {
    pub id: u32,
    pub error_code: u16,
    pub data: Vec<u8>,
}

impl CommandPacket {
    pub fn new(id: u32, command_set: u8, command: u8) -> Self {
        Self {
            id,
            command_set,
            command,
            data: Vec::new(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let length = HEADER_SIZE + self.data.len();
        let mut buf = BytesMut::with_capacity(length);

        buf.put_u32(length as u32);
        buf.put_u32(self.id);
        buf.put_u8(0x00);
        buf.put_u8(self.command_set);
        buf.put_u8(self.command);
        buf.put_slice(&self.data);

        buf.to_vec()
    }
}

impl ReplyPacket {
    pub fn decode(mut buf: &[u8]) -> JdwpResult<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(JdwpError::Protocol("Reply packet too short".to_string()));
        }

        let _length = buf.get_u32();
        let id = buf.get_u32();
        let flags = buf.get_u8();

        if flags != REPLY_FLAG {
            return Err(JdwpError::Protocol(format!("Invalid reply flag: {:#x}", flags)));
        }

        let error_code = buf.get_u16();

        Ok(Self {
            id,
            error_code,
            data: buf.to_vec(),
        })
    }

    pub fn is_error(&self) -> bool {
        self.error_code != 0
    }

    pub fn check_error(&self) -> JdwpResult<()> {
        if self.is_error() {
            Err(JdwpError::JdwpErrorCode(
                self.error_code,
                error_name(self.error_code).to_string(),
            ))
        } else {
            Ok(())
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Symbolic name of a JDWP error code
pub fn error_name(code: u16) -> &'static str {
    match code {
        0 => "NONE",
        10 => "INVALID_THREAD",
        11 => "INVALID_THREAD_GROUP",
        12 => "INVALID_PRIORITY",
        13 => "THREAD_NOT_SUSPENDED",
        14 => "THREAD_SUSPENDED",
        15 => "THREAD_NOT_ALIVE",
        20 => "INVALID_OBJECT",
        21 => "INVALID_CLASS",
        22 => "CLASS_NOT_PREPARED",
        23 => "INVALID_METHODID",
        24 => "INVALID_LOCATION",
        25 => "INVALID_FIELDID",
        30 => "INVALID_FRAMEID",
        31 => "NO_MORE_FRAMES",
        32 => "OPAQUE_FRAME",
        33 => "NOT_CURRENT_FRAME",
        34 => "TYPE_MISMATCH",
        35 => "INVALID_SLOT",
        40 => "DUPLICATE",
        41 => "NOT_FOUND",
        50 => "INVALID_MONITOR",
        51 => "NOT_MONITOR_OWNER",
        52 => "INTERRUPT",
        60 => "INVALID_CLASS_FORMAT",
        61 => "CIRCULAR_CLASS_DEFINITION",
        62 => "FAILS_VERIFICATION",
        68 => "UNSUPPORTED_VERSION",
        69 => "NAMES_DONT_MATCH",
        99 => "NOT_IMPLEMENTED",
        100 => "NULL_POINTER",
        101 => "ABSENT_INFORMATION",
        102 => "INVALID_EVENT_TYPE",
        103 => "ILLEGAL_ARGUMENT",
        110 => "OUT_OF_MEMORY",
        111 => "ACCESS_DENIED",
        112 => "VM_DEAD",
        113 => "INTERNAL",
        115 => "UNATTACHED_THREAD",
        500 => "INVALID_TAG",
        502 => "ALREADY_INVOKING",
        503 => "INVALID_INDEX",
        504 => "INVALID_LENGTH",
        506 => "INVALID_STRING",
        507 => "INVALID_CLASS_LOADER",
        508 => "INVALID_ARRAY",
        509 => "TRANSPORT_LOAD",
        510 => "TRANSPORT_INIT",
        511 => "NATIVE_METHOD",
        512 => "INVALID_COUNT",
        _ => "UNKNOWN_ERROR",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_packet_encode() {
        let mut packet = CommandPacket::new(7, 15, 1);
        packet.data.extend_from_slice(&[0xAA, 0xBB]);
        let encoded = packet.encode();

        assert_eq!(encoded.len(), HEADER_SIZE + 2);
        assert_eq!(&encoded[0..4], &[0, 0, 0, 13]);
        assert_eq!(&encoded[4..8], &[0, 0, 0, 7]);
        assert_eq!(encoded[8], 0x00);
        assert_eq!(encoded[9], 15);
        assert_eq!(encoded[10], 1);
        assert_eq!(&encoded[11..], &[0xAA, 0xBB]);
    }

    #[test]
    fn test_reply_with_error_code() {
        let raw = vec![
            0, 0, 0, 11, // length
            0, 0, 0, 3, // id
            0x80, // reply flag
            0, 41, // NOT_FOUND
        ];

        let packet = ReplyPacket::decode(&raw).unwrap();
        assert_eq!(packet.id, 3);
        assert!(packet.is_error());

        let err = packet.check_error().unwrap_err();
        assert_eq!(err.code(), Some(error_codes::NOT_FOUND));
        assert_eq!(err.to_string(), "JDWP error code 41: NOT_FOUND");
    }

    #[test]
    fn test_reply_rejects_command_flag() {
        let raw = vec![0, 0, 0, 11, 0, 0, 0, 1, 0x00, 0, 0];
        assert!(matches!(
            ReplyPacket::decode(&raw),
            Err(JdwpError::Protocol(_))
        ));
    }

    #[test]
    fn test_disconnect_classification() {
        assert!(JdwpError::ConnectionClosed.is_disconnect());
        assert!(JdwpError::JdwpErrorCode(112, "VM_DEAD".into()).is_disconnect());
        assert!(!JdwpError::JdwpErrorCode(41, "NOT_FOUND".into()).is_disconnect());
    }
}
