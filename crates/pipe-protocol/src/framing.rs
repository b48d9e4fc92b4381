//! Length-prefixed wire framing
//!
//! Every message travels as a 4-byte little-endian length followed by the
//! bincode payload. Sizes are validated before allocation.

use std::io::{Read, Write};

use crate::{Message, ProtocolError, ProtocolResult};

/// Maximum wire size of one control message
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Write one framed message.
pub fn write_message<W: Write>(writer: &mut W, message: &Message) -> ProtocolResult<()> {
    let data = message.to_bytes()?;
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    writer.write_all(&(data.len() as u32).to_le_bytes())?;
    writer.write_all(&data)?;
    writer.flush()?;
    Ok(())
}

/// Read one framed message.
///
/// Blocks until a full message arrives. Returns `Ok(None)` when the peer
/// closed the stream before a new length prefix (normal end-of-stream);
/// EOF in the middle of a message is an error.
pub fn read_message<R: Read>(reader: &mut R) -> ProtocolResult<Option<Message>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => ProtocolError::Truncated,
            _ => ProtocolError::Io(e),
        })?;

    Ok(Some(Message::from_bytes(&buf)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CaptureSettings;
    use std::io::Cursor;

    #[test]
    fn test_framing_round_trip() {
        let mut wire = Vec::new();
        write_message(&mut wire, &Message::CaptureStart(CaptureSettings::default())).unwrap();
        write_message(&mut wire, &Message::HotkeyPressed).unwrap();

        let mut cursor = Cursor::new(wire);
        assert_eq!(
            read_message(&mut cursor).unwrap(),
            Some(Message::CaptureStart(CaptureSettings::default()))
        );
        assert_eq!(
            read_message(&mut cursor).unwrap(),
            Some(Message::HotkeyPressed)
        );
        // Stream exhausted: clean end, not an error
        assert_eq!(read_message(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_truncated_message_is_an_error() {
        let mut wire = Vec::new();
        write_message(&mut wire, &Message::CaptureStop).unwrap();
        wire.truncate(wire.len() - 1);

        let mut cursor = Cursor::new(wire);
        assert!(matches!(
            read_message(&mut cursor),
            Err(ProtocolError::Truncated)
        ));
    }

    #[test]
    fn test_oversized_length_prefix_rejected() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&(MAX_MESSAGE_SIZE as u32 + 1).to_le_bytes());
        wire.extend_from_slice(&[0u8; 16]);

        let mut cursor = Cursor::new(wire);
        assert!(matches!(
            read_message(&mut cursor),
            Err(ProtocolError::MessageTooLarge { .. })
        ));
    }
}
