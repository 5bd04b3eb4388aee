//! Multi-part frame codec.
//!
//! # Wire format
//!
//! ```text
//! FRAME   := SEGMENT+
//! SEGMENT := TYPE ':' LENGTH ',' CONTENT
//! TYPE    := "JSON" | "PNG"
//! LENGTH  := ASCII decimal byte length of CONTENT
//! ```
//!
//! The first segment is always the JSON control payload (UTF-8 text).
//! Any following `PNG` segments carry base64-encoded image bytes, so
//! the whole frame stays ASCII. Segments are concatenated back to back.
//!
//! Decoding is all-or-nothing: any error discards the whole frame.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::FrameError;
use crate::payload::Payload;

/// Longest segment type tag we scan for before giving up on a header.
const MAX_TAG_LEN: usize = 16;

/// `usize::MAX` has 20 decimal digits.
const MAX_LENGTH_DIGITS: usize = 20;

/// Kind of a frame segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Json,
    Png,
}

impl SegmentKind {
    /// Literal tag written before the colon.
    pub fn tag(self) -> &'static str {
        match self {
            SegmentKind::Json => "JSON",
            SegmentKind::Png => "PNG",
        }
    }

    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"JSON" => Some(SegmentKind::Json),
            b"PNG" => Some(SegmentKind::Png),
            _ => None,
        }
    }
}

/// One decoded message: a control payload plus its PNG attachments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Payload,
    /// Raw PNG bytes, in wire order.
    pub attachments: Vec<Vec<u8>>,
}

impl Frame {
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self {
            payload: payload.into(),
            attachments: Vec::new(),
        }
    }

    /// Appends a PNG attachment.
    pub fn add_png(&mut self, png: Vec<u8>) {
        self.attachments.push(png);
    }

    /// Builder form of [`Frame::add_png`].
    pub fn with_png(mut self, png: Vec<u8>) -> Self {
        self.add_png(png);
        self
    }

    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        encode(&self.payload, &self.attachments)
    }

    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        decode(data)
    }
}

/// Encodes a payload and its PNG attachments into one frame.
pub fn encode<A: AsRef<[u8]>>(payload: &Payload, attachments: &[A]) -> Result<Vec<u8>, FrameError> {
    let json = payload.to_json()?;
    let encoded: Vec<String> = attachments
        .iter()
        .map(|a| BASE64.encode(a.as_ref()))
        .collect();

    let capacity = json.len()
        + encoded.iter().map(String::len).sum::<usize>()
        + (encoded.len() + 1) * (MAX_TAG_LEN + MAX_LENGTH_DIGITS + 2);
    let mut buf = Vec::with_capacity(capacity);

    write_segment(&mut buf, SegmentKind::Json, json.as_bytes());
    for content in &encoded {
        write_segment(&mut buf, SegmentKind::Png, content.as_bytes());
    }
    Ok(buf)
}

fn write_segment(buf: &mut Vec<u8>, kind: SegmentKind, content: &[u8]) {
    buf.extend_from_slice(kind.tag().as_bytes());
    buf.push(b':');
    buf.extend_from_slice(content.len().to_string().as_bytes());
    buf.push(b',');
    buf.extend_from_slice(content);
}

/// Decodes a frame produced by [`encode`].
pub fn decode(data: &[u8]) -> Result<Frame, FrameError> {
    let mut idx = 0;
    let mut payload: Option<Payload> = None;
    let mut attachments = Vec::new();

    while idx < data.len() {
        let (kind, content, next) = read_segment(data, idx)?;

        match kind {
            SegmentKind::Json => {
                if payload.is_some() {
                    return Err(FrameError::protocol("multiple JSON payloads"));
                }
                let text = std::str::from_utf8(content).map_err(|e| {
                    FrameError::validation(format!("JSON segment is not UTF-8: {e}"))
                })?;
                payload = Some(Payload::from_json(text)?);
            }
            SegmentKind::Png => {
                if payload.is_none() {
                    return Err(FrameError::protocol("attachment before payload"));
                }
                let png = BASE64.decode(content).map_err(|e| {
                    let msg = format!("invalid base64 in PNG segment at offset {idx}: {e}");
                    FrameError::format(msg)
                })?;
                attachments.push(png);
            }
        }

        idx = next;
    }

    let payload = payload.ok_or_else(|| FrameError::protocol("missing JSON payload"))?;
    Ok(Frame {
        payload,
        attachments,
    })
}

/// Reads the segment starting at `start`.
///
/// Returns its kind, its content slice and the offset of the next header.
fn read_segment(data: &[u8], start: usize) -> Result<(SegmentKind, &[u8], usize), FrameError> {
    let rest = &data[start..];

    let colon = rest
        .iter()
        .take(MAX_TAG_LEN + 1)
        .position(|&b| b == b':')
        .ok_or_else(|| {
            FrameError::format(format!("missing ':' in segment header at offset {start}"))
        })?;
    let kind = SegmentKind::from_tag(&rest[..colon]).ok_or_else(|| {
        FrameError::format(format!(
            "unknown segment type {:?} at offset {start}",
            String::from_utf8_lossy(&rest[..colon])
        ))
    })?;

    let length_start = colon + 1;
    let comma = rest[length_start..]
        .iter()
        .take(MAX_LENGTH_DIGITS + 1)
        .position(|&b| b == b',')
        .ok_or_else(|| {
            FrameError::format(format!("missing ',' after segment length at offset {start}"))
        })?;
    let digits = &rest[length_start..length_start + comma];
    let length = parse_length(digits).ok_or_else(|| {
        FrameError::format(format!(
            "invalid segment length {:?} at offset {start}",
            String::from_utf8_lossy(digits)
        ))
    })?;

    let content_start = length_start + comma + 1;
    let remaining = rest.len() - content_start;
    if length > remaining {
        return Err(FrameError::format(format!(
            "truncated {} segment at offset {start}: declared {length} bytes, {remaining} remain",
            kind.tag()
        )));
    }

    let content_end = content_start + length;
    Ok((kind, &rest[content_start..content_end], start + content_end))
}

fn parse_length(digits: &[u8]) -> Option<usize> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{DocumentRef, DocumentSyncPayload, GetImagePayload, SendImagePayload};

    fn send_image() -> Payload {
        SendImagePayload::new("D1", "bg", "R1").into()
    }

    fn blob(seed: u8, len: usize) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31) ^ seed).collect()
    }

    fn json_segment(json: &str) -> Vec<u8> {
        format!("JSON:{},{json}", json.len()).into_bytes()
    }

    #[test]
    fn exact_wire_layout() {
        let payload: Payload = GetImagePayload::new("d", "l", "p").into();
        let json = payload.to_json().unwrap();
        let png = [0x89u8, b'P', b'N', b'G'];

        let bytes = encode(&payload, &[png]).unwrap();

        let mut expected = json_segment(&json);
        expected.extend_from_slice(b"PNG:8,iVBORw==");
        assert_eq!(bytes, expected);
    }

    #[test]
    fn roundtrip_with_attachments() {
        for count in [0usize, 1, 3] {
            let blobs: Vec<Vec<u8>> = (0..count).map(|i| blob(i as u8, 100 + i * 7)).collect();
            let bytes = encode(&send_image(), &blobs).unwrap();
            let frame = decode(&bytes).unwrap();
            assert_eq!(frame.payload, send_image());
            assert_eq!(frame.attachments, blobs);
        }
    }

    #[test]
    fn roundtrip_binary_edge_bytes() {
        // Bytes that look like headers must survive untouched.
        let tricky = b"PNG:3,abc,JSON:::".to_vec();
        let all_bytes: Vec<u8> = (0..=255u8).collect();
        let frame = Frame::new(send_image())
            .with_png(tricky.clone())
            .with_png(Vec::new())
            .with_png(all_bytes.clone());
        let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded.attachments, vec![tricky, Vec::new(), all_bytes]);
    }

    #[test]
    fn roundtrip_non_ascii_json() {
        let payload: Payload =
            DocumentSyncPayload::new(vec![DocumentRef::new("9f-01", "スケッチ ✏")]).into();
        let frame = decode(&encode::<&[u8]>(&payload, &[]).unwrap()).unwrap();
        assert_eq!(frame.payload, payload);
    }

    #[test]
    fn two_json_segments_is_protocol_error() {
        let json = send_image().to_json().unwrap();
        let mut bytes = json_segment(&json);
        bytes.extend(json_segment(&json));
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, FrameError::Protocol(ref m) if m.contains("multiple JSON")));
    }

    #[test]
    fn png_before_json_is_protocol_error() {
        let json = send_image().to_json().unwrap();
        let mut bytes = b"PNG:4,AAAA".to_vec();
        bytes.extend(json_segment(&json));
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, FrameError::Protocol(ref m) if m.contains("before payload")));
    }

    #[test]
    fn truncated_segment_is_format_error() {
        let bytes = encode(&send_image(), &[blob(1, 30)]).unwrap();
        let err = decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, FrameError::Format(ref m) if m.contains("truncated")));

        let err = decode(b"JSON:500,{}").unwrap_err();
        assert!(matches!(err, FrameError::Format(_)));
    }

    #[test]
    fn malformed_headers_are_format_errors() {
        let cases: [&[u8]; 7] = [
            b"JSON",
            b"JSON:abc,{}",
            b"JSON:,{}",
            b"JSON:-2,{}",
            b"JSON:2{}",
            b"GIF:2,{}",
            b"this is not a frame at all",
        ];
        for bad in cases {
            let err = decode(bad).unwrap_err();
            assert!(
                matches!(err, FrameError::Format(_)),
                "{:?} gave {err:?}",
                String::from_utf8_lossy(bad)
            );
        }
    }

    #[test]
    fn invalid_base64_is_format_error() {
        let json = send_image().to_json().unwrap();
        let mut bytes = json_segment(&json);
        bytes.extend_from_slice(b"PNG:4,!!!!");
        assert!(matches!(decode(&bytes), Err(FrameError::Format(_))));
    }

    #[test]
    fn empty_input_has_no_payload() {
        assert!(matches!(decode(b""), Err(FrameError::Protocol(_))));
    }

    #[test]
    fn unknown_payload_type_is_validation_error() {
        let bytes = json_segment(r#"{"type":"Nope"}"#);
        assert!(matches!(decode(&bytes), Err(FrameError::Validation(_))));
    }

    #[test]
    fn error_after_valid_segments_discards_frame() {
        let mut bytes = encode(&send_image(), &[blob(2, 10)]).unwrap();
        bytes.extend_from_slice(b"PNG:x,");
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn decodes_legacy_encoder_output() {
        // Frame as written by the first encoder revision (integer tag).
        let json = r#"{"type": 0, "krita_document": "D1", "krita_layer": "bg", "run_uuid": "R1"}"#;
        let mut bytes = json_segment(json);
        bytes.extend_from_slice(b"PNG:4,AQID");
        let frame = decode(&bytes).unwrap();
        assert_eq!(frame.payload, send_image());
        assert_eq!(frame.attachments, vec![vec![1u8, 2, 3]]);
    }
}
