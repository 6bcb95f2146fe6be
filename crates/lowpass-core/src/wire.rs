//! lowpass wire format — fragment headers and the split/parse codec.
//!
//! Every datagram is a fixed-width header followed by body bytes. All header
//! fields are little-endian. The header width depends on the direction of
//! travel and is fixed by this module, not negotiated:
//!
//!   request  (client → server): index u32 | total u32 | brightness f32 | body
//!   response (server → client): index u32 | total u32 | body
//!
//! Header types use zerocopy byte-order wrappers so the layout is identical
//! on every host. There is no unsafe code in this module.

use bytes::Bytes;
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, F32, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

// ── Headers ───────────────────────────────────────────────────────────────────

/// Header on every datagram travelling from client to server.
///
/// Wire size: 12 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct RequestHeader {
    /// Zero-based position of this fragment within the message.
    pub index: U32<LittleEndian>,
    /// Number of fragments in the message. Never zero.
    pub total: U32<LittleEndian>,
    /// Brightness factor applied after the kernel pass.
    /// Repeated on every fragment of a message.
    pub brightness: F32<LittleEndian>,
}

assert_eq_size!(RequestHeader, [u8; 12]);

/// Header on every datagram travelling from server to client.
///
/// Wire size: 8 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct ResponseHeader {
    pub index: U32<LittleEndian>,
    pub total: U32<LittleEndian>,
}

assert_eq_size!(ResponseHeader, [u8; 8]);

// ── Direction ─────────────────────────────────────────────────────────────────

/// Which way a datagram travels. Decides the header layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    /// Header width in bytes for this direction.
    pub const fn header_len(self) -> usize {
        match self {
            Direction::Request => REQUEST_HEADER_LEN,
            Direction::Response => RESPONSE_HEADER_LEN,
        }
    }

    /// Largest body that still fits in one UDP datagram.
    pub const fn max_body(self) -> usize {
        MAX_UDP_PAYLOAD - self.header_len()
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

pub const REQUEST_HEADER_LEN: usize = 12;
pub const RESPONSE_HEADER_LEN: usize = 8;

/// Largest UDP payload over IPv4 (65535 - 8 UDP - 20 IP).
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Default fragment body size. Safely below `MAX_UDP_PAYLOAD` with either header.
pub const DEFAULT_FRAGMENT_BODY: usize = 60_000;

/// Well-known port the server listens on.
pub const DEFAULT_SERVER_PORT: u16 = 8888;

/// Default delay between consecutive fragment sends, in milliseconds.
pub const DEFAULT_PACING_MS: u64 = 50;

// ── Fragment ──────────────────────────────────────────────────────────────────

/// One addressed slice of a larger payload.
///
/// `param` is `Some` exactly on the request direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub index: u32,
    pub total: u32,
    pub param: Option<f32>,
    pub body: Bytes,
}

impl Fragment {
    pub fn direction(&self) -> Direction {
        if self.param.is_some() {
            Direction::Request
        } else {
            Direction::Response
        }
    }

    /// Serialize into a datagram: header followed by body.
    pub fn encode(&self) -> Vec<u8> {
        let mut datagram = Vec::with_capacity(self.direction().header_len() + self.body.len());
        match self.param {
            Some(brightness) => {
                let header = RequestHeader {
                    index: U32::new(self.index),
                    total: U32::new(self.total),
                    brightness: F32::new(brightness),
                };
                datagram.extend_from_slice(header.as_bytes());
            }
            None => {
                let header = ResponseHeader {
                    index: U32::new(self.index),
                    total: U32::new(self.total),
                };
                datagram.extend_from_slice(header.as_bytes());
            }
        }
        datagram.extend_from_slice(&self.body);
        datagram
    }
}

// ── Codec ─────────────────────────────────────────────────────────────────────

/// Number of fragments `split` produces for a payload of `len` bytes.
pub fn fragment_count(len: usize, max_body_size: usize) -> usize {
    len.div_ceil(max_body_size).max(1)
}

/// Split a payload into ordered fragments of at most `max_body_size` bytes.
///
/// An empty payload still yields one fragment with an empty body, so the
/// receiver always learns that a message happened. Bodies are zero-copy
/// slices of `payload`.
pub fn split(
    payload: Bytes,
    max_body_size: usize,
    param: Option<f32>,
) -> Result<Vec<Fragment>, WireError> {
    if max_body_size == 0 {
        return Err(WireError::ZeroBodySize);
    }
    let count = fragment_count(payload.len(), max_body_size);
    let total = u32::try_from(count).map_err(|_| WireError::TooManyFragments(count))?;

    Ok((0..total)
        .map(|index| {
            let start = index as usize * max_body_size;
            let end = (start + max_body_size).min(payload.len());
            Fragment {
                index,
                total,
                param,
                body: payload.slice(start..end),
            }
        })
        .collect())
}

/// Parse one datagram received in the given direction.
pub fn parse(datagram: &[u8], direction: Direction) -> Result<Fragment, WireError> {
    let needed = direction.header_len();
    let too_short = WireError::Malformed {
        len: datagram.len(),
        needed,
    };

    let (index, total, param) = match direction {
        Direction::Request => {
            let header = RequestHeader::read_from_prefix(datagram).ok_or(too_short)?;
            (header.index.get(), header.total.get(), Some(header.brightness.get()))
        }
        Direction::Response => {
            let header = ResponseHeader::read_from_prefix(datagram).ok_or(too_short)?;
            (header.index.get(), header.total.get(), None)
        }
    };

    if total == 0 {
        return Err(WireError::ZeroTotal);
    }
    if index >= total {
        return Err(WireError::IndexOutOfRange { index, total });
    }

    Ok(Fragment {
        index,
        total,
        param,
        body: Bytes::copy_from_slice(&datagram[needed..]),
    })
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when producing or interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("datagram of {len} bytes is shorter than the {needed}-byte header")]
    Malformed { len: usize, needed: usize },

    #[error("fragment declares a total of zero fragments")]
    ZeroTotal,

    #[error("fragment index {index} out of range for total {total}")]
    IndexOutOfRange { index: u32, total: u32 },

    #[error("fragment body size must be at least one byte")]
    ZeroBodySize,

    #[error("payload needs {0} fragments, more than the header can count")]
    TooManyFragments(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(len: usize) -> Bytes {
        (0..len).map(|i| (i * 31 % 251) as u8).collect::<Vec<u8>>().into()
    }

    #[test]
    fn request_header_is_little_endian() {
        let fragment = Fragment {
            index: 1,
            total: 0x0102_0304,
            param: Some(1.5),
            body: Bytes::from_static(b"xy"),
        };
        let datagram = fragment.encode();
        assert_eq!(datagram.len(), 14);
        assert_eq!(&datagram[0..4], &[1, 0, 0, 0]);
        assert_eq!(&datagram[4..8], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&datagram[8..12], &1.5f32.to_le_bytes());
        assert_eq!(&datagram[12..], b"xy");
    }

    #[test]
    fn response_header_has_no_parameter() {
        let fragment = Fragment {
            index: 2,
            total: 3,
            param: None,
            body: Bytes::from_static(b"abc"),
        };
        let datagram = fragment.encode();
        assert_eq!(datagram.len(), RESPONSE_HEADER_LEN + 3);
        assert_eq!(&datagram[0..4], &2u32.to_le_bytes());
        assert_eq!(&datagram[4..8], &3u32.to_le_bytes());
        assert_eq!(&datagram[8..], b"abc");
    }

    #[test]
    fn encode_then_parse_preserves_fields() {
        let original = Fragment {
            index: 4,
            total: 9,
            param: Some(0.75),
            body: Bytes::from_static(b"pixels"),
        };
        let parsed = parse(&original.encode(), Direction::Request).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn fragment_count_law() {
        for len in [1usize, 2, 59_999, 60_000, 60_001, 180_000, 180_001] {
            let fragments = split(payload(len), DEFAULT_FRAGMENT_BODY, None).unwrap();
            assert_eq!(fragments.len(), len.div_ceil(DEFAULT_FRAGMENT_BODY), "len {len}");
        }
    }

    #[test]
    fn last_fragment_carries_the_remainder() {
        let fragments = split(payload(25), 10, None).unwrap();
        let sizes: Vec<usize> = fragments.iter().map(|f| f.body.len()).collect();
        assert_eq!(sizes, vec![10, 10, 5]);

        let even = split(payload(30), 10, None).unwrap();
        assert_eq!(even.last().unwrap().body.len(), 10);
    }

    #[test]
    fn indices_are_sequential_and_totals_agree() {
        let fragments = split(payload(100), 7, Some(2.0)).unwrap();
        for (i, f) in fragments.iter().enumerate() {
            assert_eq!(f.index as usize, i);
            assert_eq!(f.total as usize, fragments.len());
            assert_eq!(f.param, Some(2.0));
        }
    }

    #[test]
    fn empty_payload_yields_one_empty_fragment() {
        let fragments = split(Bytes::new(), 10, None).unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].total, 1);
        assert!(fragments[0].body.is_empty());
    }

    #[test]
    fn concatenated_bodies_equal_payload() {
        for max in [1usize, 3, 64, 1000] {
            let data = payload(997);
            let joined: Vec<u8> = split(data.clone(), max, None)
                .unwrap()
                .iter()
                .flat_map(|f| f.body.iter().copied())
                .collect();
            assert_eq!(joined, data.to_vec(), "max {max}");
        }
    }

    #[test]
    fn zero_body_size_is_rejected() {
        assert_eq!(
            split(payload(4), 0, None).unwrap_err(),
            WireError::ZeroBodySize
        );
    }

    #[test]
    fn short_datagram_is_malformed() {
        let err = parse(&[0u8; 11], Direction::Request).unwrap_err();
        assert_eq!(err, WireError::Malformed { len: 11, needed: 12 });

        // Eight bytes is a whole response header but not a request header.
        assert!(parse(&[0, 0, 0, 0, 1, 0, 0, 0], Direction::Response).is_ok());
        assert!(parse(&[0, 0, 0, 0, 1, 0, 0, 0], Direction::Request).is_err());
    }

    #[test]
    fn inconsistent_header_is_rejected() {
        let zero_total = [0u8; 8];
        assert_eq!(
            parse(&zero_total, Direction::Response).unwrap_err(),
            WireError::ZeroTotal
        );

        let mut past_end = Vec::new();
        past_end.extend_from_slice(&3u32.to_le_bytes());
        past_end.extend_from_slice(&3u32.to_le_bytes());
        assert_eq!(
            parse(&past_end, Direction::Response).unwrap_err(),
            WireError::IndexOutOfRange { index: 3, total: 3 }
        );
    }

    #[test]
    fn max_body_fits_in_a_datagram() {
        assert!(DEFAULT_FRAGMENT_BODY <= Direction::Request.max_body());
        assert_eq!(Direction::Request.max_body() + REQUEST_HEADER_LEN, MAX_UDP_PAYLOAD);
        assert_eq!(Direction::Response.max_body() + RESPONSE_HEADER_LEN, MAX_UDP_PAYLOAD);
    }
}
