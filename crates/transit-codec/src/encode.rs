use serde_json::{Map, Value};

use crate::{IDENTIFIER_TAG, KEYWORD_TAG};

/// Encode a plain value into the wire form.
///
/// Scalars pass through unchanged except for strings: a canonical UUID gains
/// the `~u` identifier tag, and a literal leading `~` or `^` is escaped so it
/// cannot be mistaken for a tag or marker on the way back. Map keys gain the
/// `~:` keyword prefix unless already prefixed.
pub fn encode(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(encode_string(s)),
        Value::Array(items) => Value::Array(items.iter().map(encode).collect()),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(encode_key(key), encode(item));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn encode_key(key: &str) -> String {
    if key.starts_with(KEYWORD_TAG) {
        key.to_owned()
    } else {
        format!("{KEYWORD_TAG}{key}")
    }
}

fn encode_string(s: &str) -> String {
    if is_canonical_uuid(s) {
        format!("{IDENTIFIER_TAG}{s}")
    } else if s.starts_with('~') || s.starts_with('^') {
        format!("~{s}")
    } else {
        s.to_owned()
    }
}

/// Canonical identifier shape: 36 characters, hyphens at the standard
/// positions, valid hex groups.
pub(crate) fn is_canonical_uuid(s: &str) -> bool {
    s.len() == 36
        && s.as_bytes()[8] == b'-'
        && s.as_bytes()[13] == b'-'
        && s.as_bytes()[18] == b'-'
        && s.as_bytes()[23] == b'-'
        && uuid::Uuid::try_parse(s).is_ok()
}
