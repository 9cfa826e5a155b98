//! Optional delta encoding for `StreamData` payloads: a one-byte
//! discriminator followed by either the full value or a JSON merge
//! patch against the previous one.
//!
//! Only applies when the payload parses as a JSON object; anything else
//! is always sent in full, since there's no generic way to diff it.

use trebuchet_wire::Base64Bytes;

/// Discriminator byte meaning "the rest of the payload is the full value".
pub const FULL_TAG: u8 = 0;
/// Discriminator byte meaning "the rest of the payload is a JSON merge
/// patch against the previously delivered value".
pub const DELTA_TAG: u8 = 1;

/// Encodes `current` relative to `previous`, tagging the result so a
/// client can tell which case it received.
pub fn encode(previous: Option<&Base64Bytes>, current: &Base64Bytes) -> Base64Bytes {
    let current_value: Option<serde_json::Value> = serde_json::from_slice(current.as_slice()).ok();
    let previous_value: Option<serde_json::Value> =
        previous.and_then(|p| serde_json::from_slice(p.as_slice()).ok());

    match (previous_value, current_value) {
        (Some(serde_json::Value::Object(prev)), Some(serde_json::Value::Object(cur))) => {
            let mut patch = serde_json::Map::new();
            for (key, value) in &cur {
                if prev.get(key) != Some(value) {
                    patch.insert(key.clone(), value.clone());
                }
            }
            for key in prev.keys() {
                if !cur.contains_key(key) {
                    patch.insert(key.clone(), serde_json::Value::Null);
                }
            }
            let mut bytes = vec![DELTA_TAG];
            bytes.extend(serde_json::to_vec(&serde_json::Value::Object(patch)).unwrap_or_default());
            Base64Bytes::new(bytes)
        }
        _ => {
            let mut bytes = vec![FULL_TAG];
            bytes.extend_from_slice(current.as_slice());
            Base64Bytes::new(bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bytes(value: serde_json::Value) -> Base64Bytes {
        Base64Bytes::new(serde_json::to_vec(&value).unwrap())
    }

    #[test]
    fn first_value_with_no_previous_is_sent_in_full() {
        let encoded = encode(None, &bytes(json!({"a": 1})));
        assert_eq!(encoded.as_slice()[0], FULL_TAG);
    }

    #[test]
    fn changed_object_fields_are_diffed() {
        let previous = bytes(json!({"a": 1, "b": 2}));
        let current = bytes(json!({"a": 1, "b": 3}));
        let encoded = encode(Some(&previous), &current);
        assert_eq!(encoded.as_slice()[0], DELTA_TAG);

        let patch: serde_json::Value = serde_json::from_slice(&encoded.as_slice()[1..]).unwrap();
        assert_eq!(patch, json!({"b": 3}));
    }

    #[test]
    fn removed_fields_become_explicit_nulls() {
        let previous = bytes(json!({"a": 1, "b": 2}));
        let current = bytes(json!({"a": 1}));
        let encoded = encode(Some(&previous), &current);
        let patch: serde_json::Value = serde_json::from_slice(&encoded.as_slice()[1..]).unwrap();
        assert_eq!(patch, json!({"b": null}));
    }

    #[test]
    fn non_object_payloads_fall_back_to_full() {
        let previous = bytes(json!(1));
        let current = bytes(json!(2));
        let encoded = encode(Some(&previous), &current);
        assert_eq!(encoded.as_slice()[0], FULL_TAG);
    }
}
