//! Line-delimited JSON codec.

use crate::error::ProtocolError;
use crate::MAX_LINE_LENGTH;
use bytes::{Buf, BytesMut};

/// Encodes a value as a single JSON line.
pub fn encode_line<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Incremental decoder for newline-delimited JSON.
///
/// Bytes are appended as they arrive from the socket; each call to
/// [`LineDecoder::decode_line`] yields at most one complete line. Blank
/// lines are skipped. A line that fails to parse is consumed before the
/// error is returned, so the caller can log it and keep decoding.
///
/// Lines longer than the limit are never buffered whole: once the limit is
/// exceeded the decoder reports [`ProtocolError::LineTooLong`] and drops
/// input up to and including the next newline.
pub struct LineDecoder {
    buffer: BytesMut,
    max_line: usize,
    discarding: bool,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::with_max_line(MAX_LINE_LENGTH)
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_line,
            discarding: false,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next JSON line.
    pub fn decode_line<T: serde::de::DeserializeOwned>(
        &mut self,
    ) -> Result<Option<T>, ProtocolError> {
        loop {
            let newline = self.buffer.iter().position(|&b| b == b'\n');

            if self.discarding {
                match newline {
                    Some(pos) => {
                        self.buffer.advance(pos + 1);
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        self.buffer.clear();
                        return Ok(None);
                    }
                }
            }

            let Some(pos) = newline else {
                if self.buffer.len() > self.max_line {
                    let size = self.buffer.len();
                    self.buffer.clear();
                    self.discarding = true;
                    return Err(ProtocolError::LineTooLong {
                        size,
                        max: self.max_line,
                    });
                }
                return Ok(None);
            };

            if pos > self.max_line {
                self.buffer.advance(pos + 1);
                return Err(ProtocolError::LineTooLong {
                    size: pos,
                    max: self.max_line,
                });
            }

            let line = self.buffer.split_to(pos + 1);
            let text = std::str::from_utf8(&line[..pos]).map_err(|_| ProtocolError::InvalidUtf8)?;
            let text = text.trim();
            if text.is_empty() {
                continue;
            }

            return Ok(Some(serde_json::from_str(text)?));
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.remaining()
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Envelope, InboundMessage, OutboundMessage};

    #[test]
    fn test_encode_appends_newline() {
        let bytes = encode_line(&InboundMessage::stop()).unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));
        assert_eq!(bytes.iter().filter(|&&b| b == b'\n').count(), 1);
    }

    #[test]
    fn test_decode_outbound_line() {
        let msg = OutboundMessage::FsmStuck {
            state_name: "State2".to_string(),
        };
        let mut decoder = LineDecoder::new();
        decoder.extend(&encode_line(&msg).unwrap());

        let decoded: OutboundMessage = decoder.decode_line().unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_partial_line() {
        let bytes = encode_line(&InboundMessage::set_variable("x", 0)).unwrap();
        let mut decoder = LineDecoder::new();

        decoder.extend(&bytes[..10]);
        assert!(decoder.decode_line::<Envelope>().unwrap().is_none());

        decoder.extend(&bytes[10..]);
        let envelope: Envelope = decoder.decode_line().unwrap().unwrap();
        assert_eq!(envelope.msg_type, "SET_VARIABLE");
    }

    #[test]
    fn test_multiple_lines_in_one_read() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"{\"type\":\"STOP_FSM\"}\n\n  \n{\"type\":\"SET_VARIABLE\",\"payload\":{\"name\":\"a\"}}\n");

        let first: Envelope = decoder.decode_line().unwrap().unwrap();
        let second: Envelope = decoder.decode_line().unwrap().unwrap();
        assert_eq!(first.msg_type, "STOP_FSM");
        assert_eq!(second.msg_type, "SET_VARIABLE");
        assert!(decoder.decode_line::<Envelope>().unwrap().is_none());
    }

    #[test]
    fn test_malformed_line_is_consumed() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"not json\n{\"type\":\"STOP_FSM\"}\n");

        let err = decoder.decode_line::<Envelope>().unwrap_err();
        assert!(matches!(err, ProtocolError::Json(_)));

        let next: Envelope = decoder.decode_line().unwrap().unwrap();
        assert_eq!(next.msg_type, "STOP_FSM");
    }

    #[test]
    fn test_invalid_utf8_line_is_consumed() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"{\"type\":\"\xff\xfe\"}\n{\"type\":\"STOP_FSM\"}\n");

        let err = decoder.decode_line::<Envelope>().unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidUtf8));

        let next: Envelope = decoder.decode_line().unwrap().unwrap();
        assert_eq!(next.msg_type, "STOP_FSM");
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_line_too_long_is_dropped_across_reads() {
        let mut decoder = LineDecoder::with_max_line(24);
        decoder.extend(&[b'a'; 32]);

        let err = decoder.decode_line::<Envelope>().unwrap_err();
        assert!(matches!(err, ProtocolError::LineTooLong { size: 32, max: 24 }));
        assert_eq!(decoder.buffered(), 0);

        // The rest of the oversized line is dropped silently.
        decoder.extend(&[b'a'; 40]);
        assert!(decoder.decode_line::<Envelope>().unwrap().is_none());
        assert_eq!(decoder.buffered(), 0);

        decoder.extend(b"aaaa\n{\"type\":\"STOP_FSM\"}\n");
        let next: Envelope = decoder.decode_line().unwrap().unwrap();
        assert_eq!(next.msg_type, "STOP_FSM");
    }

    #[test]
    fn test_complete_line_too_long() {
        let mut decoder = LineDecoder::with_max_line(24);
        let mut input = vec![b'x'; 30];
        input.extend_from_slice(b"\n{\"type\":\"STOP_FSM\"}\n");
        decoder.extend(&input);

        let err = decoder.decode_line::<Envelope>().unwrap_err();
        assert!(matches!(err, ProtocolError::LineTooLong { size: 30, max: 24 }));

        let next: Envelope = decoder.decode_line().unwrap().unwrap();
        assert_eq!(next.msg_type, "STOP_FSM");
    }
}
