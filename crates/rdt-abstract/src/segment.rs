//! Wire format for simulation segments.
//!
//! Every frame that crosses the channel is an encoded [`Segment`]: a one-byte
//! type tag, a big-endian sequence/acknowledgment number, a body length and a
//! 16-bit ones'-complement checksum, followed by the body. No I/O happens
//! here, only byte-level encoding and validation.

use thiserror::Error;

/// Segment type tags on the wire.
pub mod seg_type {
    pub const DATA: u8 = 0;
    pub const ACK: u8 = 1;
}

/// Fixed header size: type (1) + seq/ack (4) + length (2) + checksum (2).
pub const HEADER_LEN: usize = 9;

/// Size of the optional ACK extension trailer (cumulative prefix field).
const CUM_TRAILER_LEN: usize = 4;

/// A protocol segment.
///
/// `seq` numbers index whole segments, not bytes. The ACK variant carries the
/// acknowledged seq plus, for the TCP-like pair, an optional cumulative
/// prefix: the lowest seq the receiver has *not* yet delivered in order
/// (`cum = 0` means nothing has been delivered).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Data { seq: u32, payload: Vec<u8> },
    Ack { ack: u32, cum: Option<u32> },
}

/// Errors raised when parsing a raw frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Frame shorter than the fixed header.
    #[error("frame of {0} bytes is shorter than the fixed header")]
    Truncated(usize),
    /// `length` field does not match the bytes actually present.
    #[error("length field claims {claimed} body bytes, frame carries {actual}")]
    LengthMismatch { claimed: usize, actual: usize },
    /// Recomputed checksum differs from the one on the wire.
    #[error("checksum mismatch")]
    ChecksumMismatch,
    /// Unrecognized type tag.
    #[error("unknown segment type {0}")]
    UnknownType(u8),
    /// ACK extension trailer of a length the codec does not know.
    #[error("ACK trailer of {0} bytes is neither empty nor a cumulative field")]
    BadAckTrailer(usize),
}

/// 16-bit ones'-complement Internet checksum.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);

    for chunk in &mut chunks {
        let value = u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
        sum = sum.wrapping_add(value);
    }

    if let Some(&byte) = chunks.remainder().first() {
        sum = sum.wrapping_add((byte as u32) << 8);
    }

    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

impl Segment {
    /// Serialize into a freshly allocated frame, checksum filled in.
    pub fn encode(&self) -> Vec<u8> {
        let (tag, num, body_len) = match self {
            Segment::Data { seq, payload } => (seg_type::DATA, *seq, payload.len()),
            Segment::Ack { ack, cum: Some(_) } => (seg_type::ACK, *ack, CUM_TRAILER_LEN),
            Segment::Ack { ack, cum: None } => (seg_type::ACK, *ack, 0),
        };

        let mut buf = Vec::with_capacity(HEADER_LEN + body_len);
        buf.push(tag);
        buf.extend_from_slice(&num.to_be_bytes());
        buf.extend_from_slice(&(body_len as u16).to_be_bytes());
        buf.extend_from_slice(&[0, 0]); // checksum placeholder
        match self {
            Segment::Data { payload, .. } => buf.extend_from_slice(payload),
            Segment::Ack { cum: Some(c), .. } => buf.extend_from_slice(&c.to_be_bytes()),
            Segment::Ack { cum: None, .. } => {}
        }

        let checksum = internet_checksum(&buf);
        buf[7..9].copy_from_slice(&checksum.to_be_bytes());
        buf
    }

    /// Parse and validate a raw frame.
    ///
    /// A frame whose checksum does not verify returns
    /// [`CodecError::ChecksumMismatch`]; protocols treat that exactly as a
    /// loss.
    pub fn decode(frame: &[u8]) -> Result<Segment, CodecError> {
        if frame.len() < HEADER_LEN {
            return Err(CodecError::Truncated(frame.len()));
        }

        let tag = frame[0];
        let num = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        let claimed = u16::from_be_bytes([frame[5], frame[6]]) as usize;
        let wire_checksum = u16::from_be_bytes([frame[7], frame[8]]);

        let actual = frame.len() - HEADER_LEN;
        if claimed != actual {
            return Err(CodecError::LengthMismatch { claimed, actual });
        }

        let mut scratch = frame.to_vec();
        scratch[7] = 0;
        scratch[8] = 0;
        if internet_checksum(&scratch) != wire_checksum {
            return Err(CodecError::ChecksumMismatch);
        }

        match tag {
            seg_type::DATA => Ok(Segment::Data {
                seq: num,
                payload: frame[HEADER_LEN..].to_vec(),
            }),
            seg_type::ACK => {
                let cum = match actual {
                    0 => None,
                    CUM_TRAILER_LEN => {
                        let b = &frame[HEADER_LEN..];
                        Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
                    }
                    other => return Err(CodecError::BadAckTrailer(other)),
                };
                Ok(Segment::Ack { ack: num, cum })
            }
            other => Err(CodecError::UnknownType(other)),
        }
    }

    /// The seq (DATA) or ack (ACK) number, without a full decode.
    ///
    /// Used by the channel's deterministic fault injection to match frames;
    /// returns `None` for frames too short to carry the field.
    pub fn peek_num(frame: &[u8]) -> Option<u32> {
        if frame.len() < HEADER_LEN {
            return None;
        }
        Some(u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]))
    }

    /// Type tag of an encoded frame, if present.
    pub fn peek_type(frame: &[u8]) -> Option<u8> {
        frame.first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_roundtrip() {
        let seg = Segment::Data {
            seq: 17,
            payload: vec![1, 2, 3, 4, 5],
        };
        let frame = seg.encode();
        assert_eq!(frame.len(), HEADER_LEN + 5);
        assert_eq!(Segment::decode(&frame).unwrap(), seg);
    }

    #[test]
    fn empty_payload_roundtrip() {
        let seg = Segment::Data {
            seq: 0,
            payload: Vec::new(),
        };
        assert_eq!(Segment::decode(&seg.encode()).unwrap(), seg);
    }

    #[test]
    fn ack_roundtrip() {
        let seg = Segment::Ack { ack: 9, cum: None };
        let frame = seg.encode();
        assert_eq!(frame.len(), HEADER_LEN);
        assert_eq!(Segment::decode(&frame).unwrap(), seg);
    }

    #[test]
    fn ack_with_cumulative_trailer_roundtrip() {
        let seg = Segment::Ack {
            ack: 9,
            cum: Some(7),
        };
        let frame = seg.encode();
        assert_eq!(frame.len(), HEADER_LEN + 4);
        assert_eq!(Segment::decode(&frame).unwrap(), seg);
    }

    #[test]
    fn bit_flip_anywhere_fails_checksum() {
        let frame = Segment::Data {
            seq: 3,
            payload: b"hello world".to_vec(),
        }
        .encode();

        for byte in 0..frame.len() {
            // Skipping the tag byte: flipping it can also surface as
            // UnknownType, which is an equally fatal decode error.
            if byte == 0 {
                continue;
            }
            let mut corrupted = frame.clone();
            corrupted[byte] ^= 0x10;
            let err = Segment::decode(&corrupted).unwrap_err();
            assert!(
                matches!(
                    err,
                    CodecError::ChecksumMismatch | CodecError::LengthMismatch { .. }
                ),
                "byte {byte}: unexpected {err:?}"
            );
        }
    }

    #[test]
    fn truncated_frame_rejected() {
        assert_eq!(Segment::decode(&[]), Err(CodecError::Truncated(0)));
        assert_eq!(Segment::decode(&[0; 8]), Err(CodecError::Truncated(8)));
    }

    #[test]
    fn length_mismatch_rejected() {
        let mut frame = Segment::Data {
            seq: 1,
            payload: vec![0xAA; 4],
        }
        .encode();
        frame.pop();
        assert_eq!(
            Segment::decode(&frame),
            Err(CodecError::LengthMismatch {
                claimed: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn unknown_type_rejected() {
        let mut frame = Segment::Ack { ack: 0, cum: None }.encode();
        frame[0] = 7;
        // Fix the checksum so the tag is what gets reported.
        frame[7] = 0;
        frame[8] = 0;
        let checksum = internet_checksum(&frame);
        frame[7..9].copy_from_slice(&checksum.to_be_bytes());
        assert_eq!(Segment::decode(&frame), Err(CodecError::UnknownType(7)));
    }

    #[test]
    fn peek_matches_decode() {
        let frame = Segment::Data {
            seq: 42,
            payload: vec![9; 3],
        }
        .encode();
        assert_eq!(Segment::peek_num(&frame), Some(42));
        assert_eq!(Segment::peek_type(&frame), Some(seg_type::DATA));
        assert_eq!(Segment::peek_num(&[0; 3]), None);
    }

    #[test]
    fn checksum_known_vector() {
        // 0x0001 + 0xf203 = 0xf204; complement = 0x0dfb.
        assert_eq!(internet_checksum(&[0x00, 0x01, 0xf2, 0x03]), 0x0dfb);
        // Odd trailing byte is padded on the right.
        assert_eq!(internet_checksum(&[0xff]), !(0xff00u16));
    }
}
