//! frame.rs
//!
//! Length-prefix framing used by the apcupsd NIS.
//!
//! Every message in either direction is a 2-byte big-endian length followed by
//! that many bytes. A zero length from the daemon ends the response.

/// Size of the length prefix in bytes.
pub const LENGTH_SIZE: usize = 2;

/// Errors raised while framing or unframing NIS messages.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The command does not fit in a 16-bit length prefix.
    #[error("command too long ({len} bytes, max {max})", max = u16::MAX)]
    CommandTooLong { len: usize },

    /// Fewer than two bytes were handed to the length decoder.
    #[error("incomplete length prefix ({got} of 2 bytes)")]
    IncompleteLength { got: usize },
}

/// Big-endian encoding of a frame length.
pub fn encode_length(len: u16) -> [u8; LENGTH_SIZE] {
    len.to_be_bytes()
}

/// Decode the length prefix at the start of `src`.
pub fn decode_length(src: &[u8]) -> Result<u16, FrameError> {
    match src {
        [hi, lo, ..] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(FrameError::IncompleteLength { got: src.len() }),
    }
}

/// Frame a command for sending: length prefix followed by the raw bytes, no
/// trailing null.
pub fn encode_command(command: &[u8]) -> Result<Vec<u8>, FrameError> {
    let len = u16::try_from(command.len())
        .map_err(|_| FrameError::CommandTooLong { len: command.len() })?;

    let mut dst = Vec::with_capacity(LENGTH_SIZE + command.len());
    dst.extend_from_slice(&encode_length(len));
    dst.extend_from_slice(command);
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_roundtrip() {
        for n in 0..=u16::MAX {
            assert_eq!(decode_length(&encode_length(n)).unwrap(), n);
        }
    }

    #[test]
    fn test_length_is_big_endian() {
        assert_eq!(encode_length(6), [0x00, 0x06]);
        assert_eq!(encode_length(0x0102), [0x01, 0x02]);
        assert_eq!(decode_length(&[0x01, 0x00]).unwrap(), 256);
    }

    #[test]
    fn test_decode_short_buffer() {
        assert!(matches!(
            decode_length(&[0x00]),
            Err(FrameError::IncompleteLength { got: 1 })
        ));
        assert!(matches!(
            decode_length(&[]),
            Err(FrameError::IncompleteLength { got: 0 })
        ));
    }

    #[test]
    fn test_encode_status_command() {
        assert_eq!(encode_command(b"status").unwrap(), b"\x00\x06status");
    }

    #[test]
    fn test_encode_empty_command() {
        assert_eq!(encode_command(b"").unwrap(), vec![0x00, 0x00]);
    }

    #[test]
    fn test_encode_command_too_long() {
        let command = vec![b'x'; usize::from(u16::MAX) + 1];
        assert!(matches!(
            encode_command(&command),
            Err(FrameError::CommandTooLong { len: 65536 })
        ));

        let command = vec![b'x'; usize::from(u16::MAX)];
        assert_eq!(encode_command(&command).unwrap().len(), 65537);
    }
}
