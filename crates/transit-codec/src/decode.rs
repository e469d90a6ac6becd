use serde_json::{Map, Value};

use crate::{IDENTIFIER_TAG, KEYWORD_TAG, MAP_MARKER, cache, error::TransitError};

/// Decode a wire value into its plain form.
///
/// Three encodings of an associative structure are recognized: a plain object
/// (keys may carry the `~:` prefix or a cache marker), an array led by the
/// `"^ "` marker with alternating key/value elements, and a bare array decoded
/// element-wise. Identifier and keyword tags are stripped from strings.
///
/// Decoding is fully recursive and terminates on any finite input; the only
/// failures are structural (duplicate keys, a dangling key, a non-string key
/// in a flattened map).
pub fn decode(value: &Value) -> Result<Value, TransitError> {
    match value {
        Value::String(s) => Ok(Value::String(decode_string(s))),
        Value::Array(items) => decode_array(items),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, item) in map {
                insert_unique(&mut out, decode_key(key), decode(item)?)?;
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn decode_array(items: &[Value]) -> Result<Value, TransitError> {
    match items.first() {
        Some(Value::String(marker)) if marker == MAP_MARKER => decode_flattened_map(&items[1..]),
        _ => Ok(Value::Array(
            items.iter().map(decode).collect::<Result<_, _>>()?,
        )),
    }
}

/// Decode the alternating key/value tail of a `"^ "`-marked array.
fn decode_flattened_map(entries: &[Value]) -> Result<Value, TransitError> {
    let mut out = Map::with_capacity(entries.len() / 2);
    let mut chunks = entries.chunks_exact(2);
    for pair in &mut chunks {
        let key = match &pair[0] {
            Value::String(s) => decode_key(s),
            other => {
                return Err(TransitError::NonStringKey {
                    found: other.to_string(),
                });
            }
        };
        insert_unique(&mut out, key, decode(&pair[1])?)?;
    }
    if let [trailing] = chunks.remainder() {
        return Err(TransitError::DanglingKey {
            key: trailing.to_string(),
        });
    }
    Ok(Value::Object(out))
}

fn insert_unique(map: &mut Map<String, Value>, key: String, value: Value) -> Result<(), TransitError> {
    if map.contains_key(&key) {
        return Err(TransitError::DuplicateKey { key });
    }
    map.insert(key, value);
    Ok(())
}

fn decode_key(key: &str) -> String {
    if let Some(resolved) = cache::resolve(key) {
        return resolved.to_owned();
    }
    if let Some(stripped) = key.strip_prefix(KEYWORD_TAG) {
        return stripped.to_owned();
    }
    unescape(key)
}

fn decode_string(s: &str) -> String {
    if let Some(stripped) = s.strip_prefix(IDENTIFIER_TAG) {
        return stripped.to_owned();
    }
    if let Some(stripped) = s.strip_prefix(KEYWORD_TAG) {
        return stripped.to_owned();
    }
    unescape(s)
}

/// Undo the `~`-escape for strings with a literal leading `~` or `^`.
fn unescape(s: &str) -> String {
    match s.strip_prefix('~') {
        Some(rest) if rest.starts_with('~') || rest.starts_with('^') => rest.to_owned(),
        _ => s.to_owned(),
    }
}
