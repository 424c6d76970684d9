use crate::error::{RelayError, Result};

/// RPC message type, from the low byte of the version/type word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call = 1,
    Reply = 2,
    Exception = 3,
    Oneway = 4,
}

impl MessageType {
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            1 => Ok(MessageType::Call),
            2 => Ok(MessageType::Reply),
            3 => Ok(MessageType::Exception),
            4 => Ok(MessageType::Oneway),
            other => Err(RelayError::Malformed(format!(
                "unknown message type {}",
                other
            ))),
        }
    }
}

fn read_i32(buf: &[u8], offset: usize) -> Result<i32> {
    match buf.get(offset..offset + 4) {
        Some(bytes) => Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        None => Err(RelayError::Malformed(format!(
            "read of 4 bytes at offset {} beyond message of {} bytes",
            offset,
            buf.len()
        ))),
    }
}

fn write_i32(buf: &mut [u8], offset: usize, value: i32) -> Result<()> {
    if offset + 4 > buf.len() {
        return Err(RelayError::Malformed(format!(
            "write of 4 bytes at offset {} beyond message of {} bytes",
            offset,
            buf.len()
        )));
    }
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    Ok(())
}

/// A single RPC frame, owned as raw bytes.
///
/// The body begins with a 4-byte version/type word, a length-prefixed UTF-8
/// method name, then the 4-byte sequence identifier; framed messages carry a
/// 4-byte big-endian length prefix before the body. The framed flag is
/// derived from the first byte: an unframed body starts with the version
/// word whose high bit is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    buf: Vec<u8>,
}

impl Message {
    pub fn new(buf: Vec<u8>) -> Self {
        Self { buf }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Framed messages carry a length prefix; bit 0x80 of the first byte set
    /// means the buffer starts directly with the version word (unframed).
    pub fn is_framed(&self) -> bool {
        self.buf.first().map_or(true, |b| b & 0x80 != 0x80)
    }

    /// Message type from the low byte of the version/type word.
    pub fn kind(&self) -> Result<MessageType> {
        let offset = if self.is_framed() { 4 } else { 0 };
        let byte = self.buf.get(offset + 3).ok_or_else(|| {
            RelayError::Malformed("message too short for version word".to_string())
        })?;
        MessageType::from_byte(*byte)
    }

    /// The method name carried by the message.
    pub fn name(&self) -> Result<String> {
        let offset = self.name_offset();
        let len = read_i32(&self.buf, offset)?;
        if len < 0 {
            return Err(RelayError::Malformed(format!("negative name length {}", len)));
        }
        let start = offset + 4;
        let end = start + len as usize;
        if end > self.buf.len() {
            return Err(RelayError::Malformed(format!(
                "name of {} bytes at offset {} beyond message of {} bytes",
                len,
                start,
                self.buf.len()
            )));
        }
        Ok(String::from_utf8_lossy(&self.buf[start..end]).into_owned())
    }

    pub fn seq_id(&self) -> Result<i32> {
        let offset = self.seq_id_offset()?;
        read_i32(&self.buf, offset)
    }

    /// Rewrites the sequence identifier in place. Never reallocates.
    pub fn set_seq_id(&mut self, seq_id: i32) -> Result<()> {
        let offset = self.seq_id_offset()?;
        write_i32(&mut self.buf, offset, seq_id)
    }

    /// Hex dump of the frame for debug logging.
    pub fn hex(&self) -> String {
        let mut out = String::with_capacity(self.buf.len() * 3);
        for (i, b) in self.buf.iter().enumerate() {
            if i > 0 {
                out.push(if i % 16 == 0 { '\n' } else { ' ' });
            }
            out.push_str(&format!("{:02x}", b));
        }
        out
    }

    fn name_offset(&self) -> usize {
        if self.is_framed() {
            8
        } else {
            4
        }
    }

    fn seq_id_offset(&self) -> Result<usize> {
        let offset = self.name_offset();
        let name_len = read_i32(&self.buf, offset)?;
        if name_len < 0 {
            return Err(RelayError::Malformed(format!(
                "negative name length {}",
                name_len
            )));
        }
        Ok(offset + 4 + name_len as usize)
    }
}

/// Growable byte accumulator from which complete messages are extracted.
///
/// `extract` always reads a 4-byte length prefix first, also for streams
/// that are nominally unframed: an unframed stream parses correctly only
/// when the sender happens to emit each message in one batch that looks
/// framed to the buffer. This matches the long-standing behaviour of the
/// proxy; detecting framedness here would change the observable semantics,
/// so the quirk stays.
#[derive(Debug, Default)]
pub struct MessageBuffer {
    buf: Vec<u8>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Slices the next complete message out of the buffer, or returns
    /// `None` until enough bytes have arrived.
    pub fn extract(&mut self) -> Option<Message> {
        if self.buf.len() > 4 {
            if let Ok(len) = read_i32(&self.buf, 0) {
                if len >= 0 && self.buf.len() >= 4 + len as usize {
                    let frame: Vec<u8> = self.buf.drain(..4 + len as usize).collect();
                    return Some(Message::new(frame));
                }
            }
        }
        None
    }
}
