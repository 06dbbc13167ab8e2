use bytes::Bytes;
use wiremux_stream::Item;

use crate::error::{FrameError, Result};

/// Serialize an item into payload bytes plus its `is_raw` flag.
///
/// Raw byte sequences pass through untouched; structured values are
/// JSON-encoded to UTF-8 text.
pub fn serialize_item(item: &Item) -> Result<(Bytes, bool)> {
    match item {
        Item::Raw(bytes) => Ok((bytes.clone(), true)),
        Item::Value(value) => {
            let text = serde_json::to_vec(value)
                .map_err(|err| FrameError::Serialize(err.to_string()))?;
            Ok((Bytes::from(text), false))
        }
    }
}

/// Reconstruct an item from payload bytes.
///
/// Never fails: a non-raw payload that does not parse as JSON is delivered
/// as its decoded text, tolerating legacy or partial producers.
pub fn deserialize_item(payload: Bytes, is_raw: bool) -> Item {
    if is_raw {
        return Item::Raw(payload);
    }
    match serde_json::from_slice(&payload) {
        Ok(value) => Item::Value(value),
        Err(_) => Item::Value(serde_json::Value::String(
            String::from_utf8_lossy(&payload).into_owned(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_values_roundtrip_exactly() {
        for value in [
            json!(null),
            json!(true),
            json!(42),
            json!(-3.5),
            json!("text with \"quotes\""),
            json!([1, "two", null]),
            json!({"nested": {"a": [1, 2]}, "b": false}),
        ] {
            let item = Item::Value(value.clone());
            let (payload, is_raw) = serialize_item(&item).unwrap();
            assert!(!is_raw);
            assert_eq!(deserialize_item(payload, is_raw), Item::Value(value));
        }
    }

    #[test]
    fn raw_bytes_roundtrip_byte_for_byte() {
        let blob = Bytes::from_static(&[0x00, 0xFF, 0x80, 0x7F]);
        let item = Item::Raw(blob.clone());

        let (payload, is_raw) = serialize_item(&item).unwrap();
        assert!(is_raw);
        assert_eq!(payload, blob);
        assert_eq!(deserialize_item(payload, true), Item::Raw(blob));
    }

    #[test]
    fn control_characters_are_escaped_in_json_payloads() {
        // A JSON string may contain U+0001, but the encoded text never
        // carries the raw byte, so it cannot collide with the frame marker.
        let item = Item::Value(json!("a\u{1}b"));
        let (payload, _) = serialize_item(&item).unwrap();
        assert!(!payload.contains(&0x01));
        assert_eq!(deserialize_item(payload, false), item);
    }

    #[test]
    fn unparseable_payload_degrades_to_text() {
        let payload = Bytes::from_static(b"not json at all");
        assert_eq!(
            deserialize_item(payload, false),
            Item::Value(json!("not json at all"))
        );
    }

    #[test]
    fn invalid_utf8_degrades_lossily() {
        let payload = Bytes::from_static(&[0xFF, 0xFE]);
        let item = deserialize_item(payload, false);
        let Item::Value(serde_json::Value::String(text)) = item else {
            panic!("expected a string value");
        };
        assert_eq!(text, "\u{FFFD}\u{FFFD}");
    }
}
