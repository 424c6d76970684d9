use super::message::{Message, MessageType};

/// Binary-protocol struct field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Bool = 2,
    Byte = 3,
    Double = 4,
    I16 = 6,
    I32 = 8,
    I64 = 10,
    String = 11,
    Struct = 12,
    Map = 13,
    Set = 14,
    List = 15,
}

/// Application-level exception code for "internal error".
const INTERNAL_ERROR: i32 = 6;

/// Incremental writer for well-formed binary RPC messages.
///
/// A framed build reserves a 4-byte length prefix up front and back-patches
/// it on completion; an unframed build starts directly with the version
/// word, so the high bit of its first byte is set and readers classify it
/// correctly.
pub struct MessageWriter {
    framed: bool,
    buf: Vec<u8>,
}

impl MessageWriter {
    pub fn new(framed: bool) -> Self {
        let mut buf = Vec::new();
        if framed {
            buf.extend_from_slice(&[0u8; 4]);
        }
        Self { framed, buf }
    }

    pub fn begin_message(&mut self, name: &str, kind: MessageType, seq_id: i32) {
        self.write_u32(0x8001_0000 | kind as u32);
        self.write_string(name);
        self.write_i32(seq_id);
    }

    pub fn begin_field(&mut self, field_type: FieldType, field_id: i16) {
        self.buf.push(field_type as u8);
        self.buf.extend_from_slice(&field_id.to_be_bytes());
    }

    pub fn stop_field(&mut self) {
        self.buf.push(0);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_string(&mut self, s: &str) {
        self.write_i32(s.len() as i32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn into_message(mut self) -> Message {
        if self.framed {
            let body_len = (self.buf.len() - 4) as i32;
            self.buf[..4].copy_from_slice(&body_len.to_be_bytes());
        }
        Message::new(self.buf)
    }
}

/// Synthesises the exception returned to a client when its request cannot
/// be served: same framed flavour and method name as the request, the given
/// sequence id, and a struct body carrying the error text (field 1) and the
/// INTERNAL_ERROR code (field 2).
pub fn build_internal_error(framed: bool, name: &str, seq_id: i32, text: &str) -> Message {
    let mut writer = MessageWriter::new(framed);
    writer.begin_message(name, MessageType::Exception, seq_id);
    writer.begin_field(FieldType::String, 1);
    writer.write_string(text);
    writer.begin_field(FieldType::I32, 2);
    writer.write_i32(INTERNAL_ERROR);
    writer.stop_field();
    writer.into_message()
}
