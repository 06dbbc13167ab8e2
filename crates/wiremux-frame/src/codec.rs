use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::error::{FrameError, Result};

/// Frame header: marker (1) + id (1) + end flag (1) + raw flag (1) = 4 bytes.
pub const HEADER_SIZE: usize = 4;

/// Start-of-frame marker byte.
pub const MARKER: u8 = 0x01;

/// Offset added to every header field byte so none collides with [`MARKER`].
pub const FIELD_OFFSET: u8 = 5;

/// Highest stream id the one-byte header field can carry.
pub const MAX_STREAM_ID: u8 = 250;

/// Routing header carried by every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Index of the source stream this frame belongs to.
    pub id: u8,
    /// Terminal frame for this id; no further frames may follow.
    pub end: bool,
    /// Payload is an unencoded byte sequence rather than JSON text.
    pub is_raw: bool,
}

impl Header {
    /// A non-terminal JSON-payload header for `id`.
    pub fn new(id: u8) -> Self {
        Self {
            id,
            end: false,
            is_raw: false,
        }
    }
}

/// A framed unit as it appears on the combined wire.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Routing header.
    pub header: Header,
    /// Payload bytes.
    pub payload: Bytes,
}

/// Encode a header into the wire format.
///
/// Wire format (no length field — frame boundaries are recovered by
/// scanning for the next marker):
/// ```text
/// ┌──────────┬──────────┬──────────┬──────────┬───────────┐
/// │ Marker   │ Id       │ End      │ Raw      │ Payload   │
/// │ 0x01     │ id + 5   │ end + 5  │ raw + 5  │ ...       │
/// └──────────┴──────────┴──────────┴──────────┴───────────┘
/// ```
pub fn encode_header(header: Header, dst: &mut BytesMut) -> Result<()> {
    if header.id > MAX_STREAM_ID {
        return Err(FrameError::IdOutOfRange {
            id: header.id,
            max: MAX_STREAM_ID,
        });
    }
    dst.reserve(HEADER_SIZE);
    dst.put_u8(MARKER);
    dst.put_u8(header.id + FIELD_OFFSET);
    dst.put_u8(header.end as u8 + FIELD_OFFSET);
    dst.put_u8(header.is_raw as u8 + FIELD_OFFSET);
    Ok(())
}

/// Decode a 4-byte header.
pub fn decode_header(src: &[u8]) -> Result<Header> {
    if src.len() < HEADER_SIZE {
        return Err(FrameError::TruncatedHeader { got: src.len() });
    }
    if src[0] != MARKER {
        return Err(FrameError::InvalidMarker { byte: src[0] });
    }
    let id = src[1]
        .checked_sub(FIELD_OFFSET)
        .ok_or(FrameError::InvalidFieldByte { byte: src[1] })?;
    // Flag bytes decode leniently: anything other than the bare offset is
    // treated as true.
    Ok(Header {
        id,
        end: src[2] != FIELD_OFFSET,
        is_raw: src[3] != FIELD_OFFSET,
    })
}

/// Encode a complete frame (header + payload) into `dst`.
pub fn encode_frame(header: Header, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    encode_header(header, dst)?;
    dst.reserve(payload.len());
    dst.put_slice(payload);
    Ok(())
}

/// Decode the next frame from a buffer of wire bytes.
///
/// Returns `Ok(None)` if the buffer does not yet hold a complete frame.
/// A frame is only complete once the marker of the following frame is
/// visible; pass `eof = true` after the input has ended so the final frame
/// (which no marker terminates) is flushed. On success, consumes the
/// frame's bytes from the buffer.
///
/// Because the format has no length field, a payload byte equal to the
/// marker is indistinguishable from a frame boundary and corrupts
/// reassembly. Producers of raw payloads must keep `0x01` out of them;
/// JSON payloads are safe since control characters are always escaped.
pub fn decode_frame(src: &mut BytesMut, eof: bool) -> Result<Option<Frame>> {
    if src.is_empty() {
        return Ok(None);
    }
    if src[0] != MARKER {
        debug!(byte = src[0], "unframed byte where a frame marker was expected");
        return Err(FrameError::StrayData);
    }
    if src.len() < HEADER_SIZE {
        if eof {
            return Err(FrameError::TruncatedHeader { got: src.len() });
        }
        return Ok(None); // Need more data
    }

    // Payload runs to the next marker. Header field bytes never equal the
    // marker, so the scan starts after them.
    let total = match src[HEADER_SIZE..].iter().position(|&b| b == MARKER) {
        Some(pos) => HEADER_SIZE + pos,
        None if eof => src.len(),
        None => return Ok(None), // Need more data
    };

    let header = decode_header(&src[..HEADER_SIZE])?;
    let mut frame = src.split_to(total);
    let payload = frame.split_off(HEADER_SIZE).freeze();

    Ok(Some(Frame { header, payload }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_bytes(header: Header, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        encode_frame(header, payload, &mut buf).unwrap();
        buf
    }

    #[test]
    fn header_roundtrip_all_flag_combinations() {
        for id in [0u8, 1, 17, 250] {
            for end in [false, true] {
                for is_raw in [false, true] {
                    let header = Header { id, end, is_raw };
                    let mut buf = BytesMut::new();
                    encode_header(header, &mut buf).unwrap();
                    assert_eq!(buf.len(), HEADER_SIZE);
                    assert_eq!(decode_header(&buf).unwrap(), header);
                }
            }
        }
    }

    #[test]
    fn header_wire_layout_is_exact() {
        let mut buf = BytesMut::new();
        encode_header(
            Header {
                id: 2,
                end: true,
                is_raw: false,
            },
            &mut buf,
        )
        .unwrap();
        assert_eq!(buf.as_ref(), &[0x01, 7, 6, 5]);
    }

    #[test]
    fn id_above_250_rejected_at_encode() {
        let mut buf = BytesMut::new();
        let err = encode_header(Header::new(251), &mut buf).unwrap_err();
        assert!(matches!(err, FrameError::IdOutOfRange { id: 251, max: 250 }));
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_header_rejects_short_input() {
        let err = decode_header(&[0x01, 0x05]).unwrap_err();
        assert!(matches!(err, FrameError::TruncatedHeader { got: 2 }));
    }

    #[test]
    fn decode_header_rejects_missing_marker() {
        let err = decode_header(&[0x02, 0x05, 0x05, 0x05]).unwrap_err();
        assert!(matches!(err, FrameError::InvalidMarker { byte: 0x02 }));
    }

    #[test]
    fn decode_header_rejects_id_byte_below_offset() {
        let err = decode_header(&[0x01, 0x03, 0x05, 0x05]).unwrap_err();
        assert!(matches!(err, FrameError::InvalidFieldByte { byte: 0x03 }));
    }

    #[test]
    fn frame_complete_only_at_next_marker_or_eof() {
        let mut buf = frame_bytes(Header::new(0), b"payload");

        // Without a following marker the frame cannot be complete yet.
        assert!(decode_frame(&mut buf, false).unwrap().is_none());

        // At end of input the tail frame is flushed.
        let frame = decode_frame(&mut buf, true).unwrap().unwrap();
        assert_eq!(frame.header, Header::new(0));
        assert_eq!(frame.payload.as_ref(), b"payload");
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_concatenated_frames() {
        let mut buf = frame_bytes(Header::new(0), b"first");
        buf.extend_from_slice(&frame_bytes(Header::new(1), b"second"));
        buf.extend_from_slice(&frame_bytes(
            Header {
                id: 2,
                end: true,
                is_raw: true,
            },
            b"third",
        ));

        let f1 = decode_frame(&mut buf, false).unwrap().unwrap();
        assert_eq!((f1.header.id, f1.payload.as_ref()), (0, b"first".as_ref()));

        let f2 = decode_frame(&mut buf, false).unwrap().unwrap();
        assert_eq!((f2.header.id, f2.payload.as_ref()), (1, b"second".as_ref()));

        // The last frame needs the eof flag; no marker follows it.
        assert!(decode_frame(&mut buf, false).unwrap().is_none());
        let f3 = decode_frame(&mut buf, true).unwrap().unwrap();
        assert_eq!((f3.header.id, f3.payload.as_ref()), (2, b"third".as_ref()));
        assert!(f3.header.end);
        assert!(f3.header.is_raw);
    }

    #[test]
    fn decode_across_split_header() {
        let whole = frame_bytes(Header::new(4), b"split");
        let mut buf = BytesMut::new();

        // First two bytes only: not even a full header.
        buf.extend_from_slice(&whole[..2]);
        assert!(decode_frame(&mut buf, false).unwrap().is_none());

        buf.extend_from_slice(&whole[2..]);
        let frame = decode_frame(&mut buf, true).unwrap().unwrap();
        assert_eq!(frame.header.id, 4);
        assert_eq!(frame.payload.as_ref(), b"split");
    }

    #[test]
    fn empty_payload_frame() {
        let mut buf = frame_bytes(
            Header {
                id: 0,
                end: true,
                is_raw: false,
            },
            b"",
        );
        buf.extend_from_slice(&frame_bytes(Header::new(1), b"x"));

        let frame = decode_frame(&mut buf, false).unwrap().unwrap();
        assert_eq!(frame.header.id, 0);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn stray_leading_bytes_rejected() {
        let mut buf = BytesMut::from(&b"\x7fgarbage"[..]);
        let err = decode_frame(&mut buf, false).unwrap_err();
        assert!(matches!(err, FrameError::StrayData));
    }

    #[test]
    fn truncated_header_at_eof_rejected() {
        let mut buf = BytesMut::from(&[0x01, 0x05][..]);
        assert!(decode_frame(&mut buf, false).unwrap().is_none());
        let err = decode_frame(&mut buf, true).unwrap_err();
        assert!(matches!(err, FrameError::TruncatedHeader { got: 2 }));
    }

    #[test]
    fn marker_byte_in_raw_payload_splits_the_frame() {
        // The documented reassembly gap: a payload 0x01 reads as a frame
        // boundary.
        let mut buf = frame_bytes(
            Header {
                id: 0,
                end: false,
                is_raw: true,
            },
            &[0xAA, MARKER, 0x05, 0x05, 0x05],
        );

        let first = decode_frame(&mut buf, true).unwrap().unwrap();
        assert_eq!(first.payload.as_ref(), &[0xAA]);

        let second = decode_frame(&mut buf, true).unwrap().unwrap();
        assert_eq!(second.header.id, 0);
        assert!(second.payload.is_empty());
    }
}
