fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use cksync_imaging::{ImageCodec, PngCodec};
    use cksync_protocol::{Frame, MessageType, Payload};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn load_json(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    fn load_frame(name: &str) -> Vec<u8> {
        let path = fixtures_dir().join(name);
        fs::read(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// Parses a fixture written with an integer `type`, re-serializes it
    /// and compares against the fixture with the tag spelled as a string.
    fn roundtrip_json(name: &str, expected: MessageType) {
        let mut fixture = load_json(name);
        let parsed: Payload = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        assert_eq!(parsed.message_type(), expected);

        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));
        fixture["type"] = serde_json::Value::String(expected.as_str().to_string());
        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  Rust:    {reserialized}"
        );
    }

    /// Decodes a frame fixture, then checks that our own encoding of it
    /// decodes to the same frame.
    fn decode_and_reencode(name: &str) -> Frame {
        let data = load_frame(name);
        let frame = Frame::decode(&data).unwrap_or_else(|e| panic!("failed to decode {name}: {e}"));
        let again = Frame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(frame, again, "re-encode mismatch for {name}");
        frame
    }

    // --- Payload fixtures ---

    #[test]
    fn fixture_send_image() {
        roundtrip_json("send_image.json", MessageType::SendImage);
    }

    #[test]
    fn fixture_get_image() {
        roundtrip_json("get_image.json", MessageType::GetImage);
    }

    #[test]
    fn fixture_document_sync() {
        roundtrip_json("document_sync.json", MessageType::DocumentSync);
    }

    // --- Frame fixtures ---

    #[test]
    fn frame_send_image_with_two_pngs() {
        let frame = decode_and_reencode("send_image_two_pngs.frame");
        match &frame.payload {
            Payload::SendImage(p) => {
                assert_eq!(p.document_id, "D1");
                assert_eq!(p.layer, "bg");
                assert_eq!(p.run_id, "R1");
                assert!(!p.append_to_previous_run);
            }
            other => panic!("expected SendImage, got {other:?}"),
        }
        assert_eq!(frame.attachments.len(), 2);
        for png in &frame.attachments {
            let image = PngCodec.decode_png(png).unwrap();
            assert_eq!((image.width(), image.height()), (10, 10));
        }
    }

    #[test]
    fn frame_get_image_request_has_no_attachments() {
        let frame = decode_and_reencode("get_image_request.frame");
        match &frame.payload {
            Payload::GetImage(p) => {
                assert_eq!(p.layer, "gen/line art");
                assert!(p.filename_prefix.starts_with("cks_"));
            }
            other => panic!("expected GetImage, got {other:?}"),
        }
        assert!(frame.attachments.is_empty());
    }

    #[test]
    fn frame_get_image_reply_carries_layer_png() {
        let frame = decode_and_reencode("get_image_reply.frame");
        assert_eq!(frame.payload.message_type(), MessageType::GetImage);
        assert_eq!(frame.attachments.len(), 1);
        let image = PngCodec.decode_png(&frame.attachments[0]).unwrap();
        assert_eq!((image.width(), image.height()), (3, 2));
    }

    #[test]
    fn frame_document_sync() {
        let frame = decode_and_reencode("document_sync.frame");
        match &frame.payload {
            Payload::DocumentSync(p) => {
                let names: Vec<&str> = p.document_list.iter().map(|d| d.name()).collect();
                assert_eq!(names, ["sketch.kra", "Untitled"]);
            }
            other => panic!("expected DocumentSync, got {other:?}"),
        }
    }

    #[test]
    fn png_segments_reencode_byte_identical() {
        // Headers and base64 segments are identical; only the JSON text
        // spacing and tag spelling differ from the fixture encoder.
        let data = load_frame("send_image_two_pngs.frame");
        let frame = Frame::decode(&data).unwrap();
        let ours = frame.encode().unwrap();

        let png_tail = |bytes: &[u8]| {
            let start = bytes
                .windows(4)
                .position(|w| w == b"PNG:")
                .expect("no PNG segment");
            bytes[start..].to_vec()
        };
        assert_eq!(png_tail(&data), png_tail(&ours));
    }

    #[test]
    fn truncated_fixture_is_rejected() {
        let data = load_frame("send_image_two_pngs.frame");
        assert!(Frame::decode(&data[..data.len() - 1]).is_err());
    }
}
