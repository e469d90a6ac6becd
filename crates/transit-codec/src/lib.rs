//! Codec for the tagged, cache-referencing wire encoding spoken by the design
//! service RPC API.
//!
//! The wire form is carried inside JSON, with string tags marking semantic
//! types and a couple of structural tricks to shrink payloads:
//!
//! ## Format rules
//! - Map keys carry the keyword prefix `~:` (`"~:name"`)
//! - UUID-shaped strings carry the identifier tag `~u` (`"~u9f2c..."`)
//! - A map may be flattened into an array led by the `"^ "` marker followed by
//!   alternating key/value elements
//! - A handful of hot keys are replaced by two-character cache markers
//!   (`"^0"` for `id`, `"^1"` for `name`, ...)
//! - A literal leading `~` or `^` in a string is escaped with a `~` prefix
//!
//! [`encode`] and [`decode`] are pure and stateless; `decode(&encode(v))`
//! returns `v` for any value built from scalars, sequences, and key-unique
//! maps. The tag prefixes are an artifact of the wire form, not part of the
//! logical value.

mod cache;
mod decode;
mod encode;
mod error;

pub use crate::{decode::decode, encode::encode, error::TransitError};

/// Marker that flags an array as a flattened key/value map.
pub(crate) const MAP_MARKER: &str = "^ ";

/// Keyword prefix applied to map keys on the wire.
pub(crate) const KEYWORD_TAG: &str = "~:";

/// Tag applied to UUID-shaped identifier strings.
pub(crate) const IDENTIFIER_TAG: &str = "~u";
