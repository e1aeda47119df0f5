//! Tokio codec for length-prefixed JSON frames
//!
//! The wire format is the ASCII decimal byte length of the JSON payload, a
//! literal `#`, then the UTF-8 JSON payload itself:
//!
//! ```text
//! 42#{"type":"StartCommand","version":[1,0,0],...}
//! ```
//!
//! When a shared secret is configured, the literal frame bytes (prefix
//! included) are run through [`SecretCipher`](crate::SecretCipher) before
//! they hit the socket, and reversed on read before frame parsing.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::cipher::SecretCipher;
use crate::error::ProtocolError;
use crate::message::Envelope;

/// Longest accepted decimal length prefix. A buffer that grows past this
/// without a `#` showing up is garbage, not a slow frame.
const MAX_PREFIX_DIGITS: usize = 20;

/// Largest accepted payload. A prefix past this would have the decoder
/// reserve absurd buffer space for a frame no peer legitimately sends.
pub const MAX_PAYLOAD_SIZE: usize = 0x00FF_FFFF;

/// Codec turning a byte stream into JSON messages and [`Envelope`]s into
/// frames
///
/// Framing errors are deliberately non-fatal: a malformed length prefix or an
/// unparsable payload drops the buffered bytes and leaves the connection
/// usable for subsequent frames.
#[derive(Debug, Default)]
pub struct JsonCodec {
    cipher: Option<SecretCipher>,
    /// Payload length parsed from the current frame's prefix, if any
    expected: Option<usize>,
    /// Bytes at the start of the read buffer that are already decrypted
    decrypted: usize,
    /// Absolute read-stream offset of the end of the decrypted region
    read_offset: u64,
    /// Absolute write-stream offset
    write_offset: u64,
}

impl JsonCodec {
    /// Codec for an unencrypted connection
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec for a connection with an optional shared secret
    pub fn with_cipher(cipher: Option<SecretCipher>) -> Self {
        Self {
            cipher,
            ..Self::default()
        }
    }

    /// Decrypt bytes that arrived since the last call
    fn decrypt_new_bytes(&mut self, src: &mut BytesMut) {
        if let Some(cipher) = &self.cipher {
            let fresh = &mut src[self.decrypted..];
            cipher.apply(self.read_offset, fresh);
            self.read_offset += fresh.len() as u64;
            self.decrypted = src.len();
        }
    }

    /// Account for bytes consumed from the front of the read buffer
    fn note_consumed(&mut self, n: usize) {
        if self.cipher.is_some() {
            self.decrypted -= n;
        }
    }

    /// Drop everything buffered and start over at the next frame boundary
    fn reset(&mut self, src: &mut BytesMut) {
        src.clear();
        self.decrypted = 0;
        self.expected = None;
    }
}

impl Decoder for JsonCodec {
    type Item = serde_json::Value;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decrypt_new_bytes(src);

        if self.expected.is_none() {
            match src.iter().position(|b| *b == b'#') {
                Some(pos) => {
                    let prefix = src.split_to(pos + 1);
                    self.note_consumed(pos + 1);
                    match parse_length_prefix(&prefix[..pos]) {
                        Ok(len) if len > MAX_PAYLOAD_SIZE => {
                            tracing::warn!(
                                len,
                                max = MAX_PAYLOAD_SIZE,
                                "dropping buffer after oversized frame prefix"
                            );
                            self.reset(src);
                            return Ok(None);
                        }
                        Ok(len) => self.expected = Some(len),
                        Err(e) => {
                            tracing::warn!(
                                buffered = src.len(),
                                "dropping buffer after framing error: {e}"
                            );
                            self.reset(src);
                            return Ok(None);
                        }
                    }
                }
                None => {
                    if src.len() > MAX_PREFIX_DIGITS {
                        tracing::warn!(
                            buffered = src.len(),
                            "no frame delimiter in sight, dropping buffer"
                        );
                        self.reset(src);
                    }
                    return Ok(None);
                }
            }
        }

        let expected = match self.expected {
            Some(len) => len,
            None => return Ok(None),
        };
        if src.len() < expected {
            // Partial frame; wait for more data
            src.reserve(expected - src.len());
            return Ok(None);
        }

        let payload = src.split_to(expected);
        self.note_consumed(expected);
        self.expected = None;

        match serde_json::from_slice(&payload) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(
                    payload = %String::from_utf8_lossy(&payload),
                    buffered = src.len(),
                    "dropping buffer after JSON parse error: {e}"
                );
                self.reset(src);
                Ok(None)
            }
        }
    }
}

impl Encoder<Envelope> for JsonCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_string(&item)?;
        let mut frame = format!("{}#{}", payload.len(), payload).into_bytes();

        if let Some(cipher) = &self.cipher {
            cipher.apply(self.write_offset, &mut frame);
            self.write_offset += frame.len() as u64;
        }

        dst.reserve(frame.len());
        dst.put_slice(&frame);
        Ok(())
    }
}

fn parse_length_prefix(digits: &[u8]) -> Result<usize, ProtocolError> {
    let text = std::str::from_utf8(digits)
        .map_err(|_| ProtocolError::BadLengthPrefix(String::from_utf8_lossy(digits).into()))?;
    text.parse::<usize>()
        .map_err(|_| ProtocolError::BadLengthPrefix(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ExitCommand, Message, ProcessStatusMessage};
    use crate::NodeStatus;

    fn sample_envelope() -> Envelope {
        Envelope::new(Message::ProcessStatusMessage(ProcessStatusMessage {
            process_id: 5,
            status: NodeStatus::Running,
        }))
    }

    fn encode_frame(codec: &mut JsonCodec, envelope: &Envelope) -> BytesMut {
        let mut buf = BytesMut::new();
        codec.encode(envelope.clone(), &mut buf).unwrap();
        buf
    }

    fn drain(codec: &mut JsonCodec, buf: &mut BytesMut) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Some(value) = codec.decode(buf).unwrap() {
            out.push(value);
        }
        out
    }

    #[test]
    fn test_roundtrip() {
        let mut codec = JsonCodec::new();
        let envelope = sample_envelope();
        let mut buf = encode_frame(&mut codec, &envelope);

        let values = drain(&mut codec, &mut buf);
        assert_eq!(values.len(), 1);
        let decoded: Envelope = serde_json::from_value(values[0].clone()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_frame_shape() {
        let mut codec = JsonCodec::new();
        let buf = encode_frame(&mut codec, &sample_envelope());

        let text = String::from_utf8(buf.to_vec()).unwrap();
        let (prefix, payload) = text.split_once('#').unwrap();
        assert_eq!(prefix.parse::<usize>().unwrap(), payload.len());
        serde_json::from_str::<serde_json::Value>(payload).unwrap();
    }

    #[test]
    fn test_split_at_every_chunk_size() {
        let envelope = sample_envelope();
        let full = encode_frame(&mut JsonCodec::new(), &envelope);

        for chunk_size in 1..=full.len() {
            let mut codec = JsonCodec::new();
            let mut buf = BytesMut::new();
            let mut decoded = Vec::new();

            for chunk in full.chunks(chunk_size) {
                buf.extend_from_slice(chunk);
                decoded.extend(drain(&mut codec, &mut buf));
            }

            assert_eq!(decoded.len(), 1, "chunk size {chunk_size}");
            let env: Envelope = serde_json::from_value(decoded[0].clone()).unwrap();
            assert_eq!(env, envelope, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn test_two_frames_in_one_read() {
        let first = sample_envelope();
        let second = Envelope::new(Message::ExitCommand(ExitCommand { id: 1 }));

        let mut codec = JsonCodec::new();
        let mut buf = encode_frame(&mut codec, &first);
        buf.extend_from_slice(&encode_frame(&mut codec, &second));

        let values = drain(&mut codec, &mut buf);
        assert_eq!(values.len(), 2);
        let a: Envelope = serde_json::from_value(values[0].clone()).unwrap();
        let b: Envelope = serde_json::from_value(values[1].clone()).unwrap();
        assert_eq!(a, first);
        assert_eq!(b, second);
    }

    #[test]
    fn test_encrypted_roundtrip_chunked() {
        let envelope = sample_envelope();
        let cipher = Some(SecretCipher::new("hunter2"));

        let mut writer = JsonCodec::with_cipher(cipher.clone());
        let full = encode_frame(&mut writer, &envelope);
        // Ciphertext should not contain the cleartext delimiter layout
        assert_ne!(full, encode_frame(&mut JsonCodec::new(), &envelope));

        for chunk_size in [1, 2, 7, full.len()] {
            let mut reader = JsonCodec::with_cipher(cipher.clone());
            let mut buf = BytesMut::new();
            let mut decoded = Vec::new();
            for chunk in full.chunks(chunk_size) {
                buf.extend_from_slice(chunk);
                decoded.extend(drain(&mut reader, &mut buf));
            }
            assert_eq!(decoded.len(), 1, "chunk size {chunk_size}");
            let env: Envelope = serde_json::from_value(decoded[0].clone()).unwrap();
            assert_eq!(env, envelope);
        }
    }

    #[test]
    fn test_encrypted_consecutive_frames() {
        let envelope = sample_envelope();
        let cipher = Some(SecretCipher::new("s"));

        let mut writer = JsonCodec::with_cipher(cipher.clone());
        let mut reader = JsonCodec::with_cipher(cipher);

        // Offsets advance across frames on both sides
        for _ in 0..3 {
            let mut buf = encode_frame(&mut writer, &envelope);
            let values = drain(&mut reader, &mut buf);
            assert_eq!(values.len(), 1);
        }
    }

    #[test]
    fn test_bad_prefix_recovers() {
        let mut codec = JsonCodec::new();
        let mut buf = BytesMut::from(&b"notanumber#{}"[..]);

        // Malformed prefix drops the buffer but keeps the codec usable
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());

        buf.extend_from_slice(&encode_frame(&mut JsonCodec::new(), &sample_envelope()));
        let values = drain(&mut codec, &mut buf);
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_oversized_prefix_recovers() {
        let mut codec = JsonCodec::new();
        // Parses as a number, but no sane peer sends a 10^19-byte frame;
        // accepting it would blow up the buffer reservation
        let mut buf = BytesMut::from(&b"9999999999999999999#{}"[..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());

        buf.extend_from_slice(&encode_frame(&mut JsonCodec::new(), &sample_envelope()));
        let values = drain(&mut codec, &mut buf);
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_bad_json_recovers() {
        let mut codec = JsonCodec::new();
        let mut buf = BytesMut::from(&b"5#oops!"[..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());

        buf.extend_from_slice(&encode_frame(&mut JsonCodec::new(), &sample_envelope()));
        let values = drain(&mut codec, &mut buf);
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_garbage_without_delimiter_is_dropped() {
        let mut codec = JsonCodec::new();
        let mut buf = BytesMut::from(&[b'x'; 64][..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_prefix_split_across_reads() {
        let mut codec = JsonCodec::new();
        let full = encode_frame(&mut JsonCodec::new(), &sample_envelope());
        let split = 1; // only the first digit of the prefix has arrived

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&full[..split]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[split..]);
        let values = drain(&mut codec, &mut buf);
        assert_eq!(values.len(), 1);
    }
}
