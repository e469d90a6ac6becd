//! Fixed table of key-cache markers.
//!
//! The service replaces a handful of very frequent map keys with two-character
//! markers. The table is fixed by the protocol; markers only ever appear in
//! key position.

const CACHE_KEYS: &[(&str, &str)] = &[
    ("^0", "id"),
    ("^1", "name"),
    ("^2", "type"),
    ("^3", "width"),
    ("^4", "height"),
    ("^5", "modified-at"),
    ("^6", "point"),
    ("^7", "matrix"),
];

/// Resolve a cache marker to its canonical key name.
pub(crate) fn resolve(marker: &str) -> Option<&'static str> {
    CACHE_KEYS
        .iter()
        .find(|(m, _)| *m == marker)
        .map(|(_, key)| *key)
}
