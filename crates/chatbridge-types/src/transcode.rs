//! Attachment transcoding between raw bytes and the text-safe wire form.
//!
//! The wire form is standard base64 with padding. The mapping never looks at
//! the bytes it encodes, so `decode(encode(b)) == b` holds for every input,
//! including the empty slice.

use crate::error::TranscodeError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Encodes raw bytes into their wire representation.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decodes a wire representation back into raw bytes.
pub fn decode(text: &str) -> Result<Vec<u8>, TranscodeError> {
    Ok(STANDARD.decode(text.as_bytes())?)
}

/// Transcoder with an optional payload size limit.
///
/// The limit applies to the decoded size in both directions. An unlimited
/// transcoder behaves exactly like [`encode`] and [`decode`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transcoder {
    max_bytes: Option<usize>,
}

impl Transcoder {
    /// A transcoder that accepts payloads of any size.
    pub fn unlimited() -> Self {
        Self { max_bytes: None }
    }

    /// A transcoder rejecting payloads larger than `max_bytes`.
    pub fn with_limit(max_bytes: usize) -> Self {
        Self {
            max_bytes: Some(max_bytes),
        }
    }

    /// Returns the configured limit, if any.
    pub fn limit(&self) -> Option<usize> {
        self.max_bytes
    }

    /// Checks a decoded size against the limit.
    pub fn check_size(&self, size: usize) -> Result<(), TranscodeError> {
        match self.max_bytes {
            Some(limit) if size > limit => Err(TranscodeError::TooLarge { size, limit }),
            _ => Ok(()),
        }
    }

    pub fn encode(&self, bytes: &[u8]) -> Result<String, TranscodeError> {
        self.check_size(bytes.len())?;
        Ok(encode(bytes))
    }

    pub fn decode(&self, text: &str) -> Result<Vec<u8>, TranscodeError> {
        // Padding makes the estimate overshoot by at most two bytes.
        let estimate = text.len() / 4 * 3;
        if let Some(limit) = self.max_bytes {
            if estimate > limit + 2 {
                return Err(TranscodeError::TooLarge {
                    size: estimate,
                    limit,
                });
            }
        }
        let bytes = decode(text)?;
        self.check_size(bytes.len())?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_empty_payload() {
        let encoded = encode(&[]);
        assert_eq!(encoded, "");
        assert_eq!(decode(&encoded).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn round_trips_every_byte_value() {
        let bytes: Vec<u8> = (0..=255u8).collect();
        assert_eq!(decode(&encode(&bytes)).unwrap(), bytes);
    }

    #[test]
    fn round_trips_lengths_around_padding_boundaries() {
        for len in 0..16usize {
            let bytes: Vec<u8> = (0..len).map(|i| (i * 37 % 256) as u8).collect();
            assert_eq!(decode(&encode(&bytes)).unwrap(), bytes, "length {}", len);
        }
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(matches!(
            decode("not base64!"),
            Err(TranscodeError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn limited_transcoder_rejects_large_payloads() {
        let transcoder = Transcoder::with_limit(4);
        assert!(transcoder.encode(b"1234").is_ok());
        assert!(matches!(
            transcoder.encode(b"12345"),
            Err(TranscodeError::TooLarge { size: 5, limit: 4 })
        ));

        let wire = encode(b"12345678");
        assert!(matches!(
            transcoder.decode(&wire),
            Err(TranscodeError::TooLarge { .. })
        ));
    }

    #[test]
    fn limited_transcoder_accepts_payload_at_limit_with_padding() {
        let transcoder = Transcoder::with_limit(4);
        // "1234" encodes to 8 chars, estimated at 6 decoded bytes.
        let wire = encode(b"1234");
        assert_eq!(transcoder.decode(&wire).unwrap(), b"1234".to_vec());
    }

    #[test]
    fn unlimited_transcoder_matches_free_functions() {
        let transcoder = Transcoder::unlimited();
        assert_eq!(transcoder.limit(), None);
        assert_eq!(transcoder.encode(b"abc").unwrap(), encode(b"abc"));
    }
}
