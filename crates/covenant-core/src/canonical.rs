//! Canonical JSON for deterministic hashing.
//!
//! Receipts, negotiation messages, and binding commitments are hashed over a
//! canonical JSON rendering so that third parties can recompute every digest
//! from stored fields alone. The profile is a strict subset of RFC 8785 (JCS)
//! and is a bit-exact contract: any deviation breaks chain verification
//! against previously written records.
//!
//! # Canonicalization Rules
//!
//! 1. Object keys are sorted in lexicographic (UTF-8 byte) order
//! 2. No whitespace between tokens
//! 3. Strings use serde_json's minimal escaping (JCS-compatible)
//! 4. Numbers must be integers within the signed 64-bit range; floats are
//!    rejected before any mutation occurs
//! 5. Structures nested deeper than [`MAX_DEPTH`] levels are rejected
//!
//! Type normalization for hashed records is fixed: identifiers are strings,
//! timestamps are RFC 3339 UTC with microsecond precision and a `Z` suffix,
//! enums are their snake_case string tags, and hashes are lowercase hex.
//!
//! # Example
//!
//! ```
//! use covenant_core::canonical::to_canonical_string;
//! use serde_json::json;
//!
//! let value = json!({"z": 1, "a": {"nested": true}});
//! assert_eq!(
//!     to_canonical_string(&value).unwrap(),
//!     r#"{"a":{"nested":true},"z":1}"#
//! );
//! ```

use serde_json::Value;
use thiserror::Error;

use crate::error::ErrorCategory;

/// Maximum nesting depth accepted by the canonicalizer.
///
/// Bounds recursion so hostile payloads cannot overflow the stack.
pub const MAX_DEPTH: usize = 64;

/// Errors that can occur during canonicalization.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CanonicalError {
    /// A floating-point number was encountered.
    ///
    /// Float formatting is not reproducible across implementations, so the
    /// profile restricts numbers to integers.
    #[error("float not allowed: canonical JSON requires integer-only numbers")]
    FloatNotAllowed,

    /// A number is outside the signed 64-bit integer range.
    #[error("number out of range: {value} is outside the signed 64-bit range")]
    NumberOutOfRange {
        /// String rendering of the rejected number.
        value: String,
    },

    /// The maximum nesting depth was exceeded.
    #[error("max depth exceeded: nested deeper than {max_depth} levels")]
    MaxDepthExceeded {
        /// The depth limit that was exceeded.
        max_depth: usize,
    },
}

impl CanonicalError {
    /// All canonicalization failures are input problems.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        ErrorCategory::Validation
    }
}

/// Produces the canonical rendering of a JSON value.
///
/// # Errors
///
/// Returns an error if the value contains floats, out-of-range numbers, or
/// exceeds [`MAX_DEPTH`].
pub fn to_canonical_string(value: &Value) -> Result<String, CanonicalError> {
    let mut out = String::new();
    write_value(&mut out, value, 0)?;
    Ok(out)
}

/// Produces the canonical rendering as bytes, ready for hashing.
///
/// # Errors
///
/// Same failure conditions as [`to_canonical_string`].
pub fn to_canonical_bytes(value: &Value) -> Result<Vec<u8>, CanonicalError> {
    to_canonical_string(value).map(String::into_bytes)
}

fn write_value(out: &mut String, value: &Value, depth: usize) -> Result<(), CanonicalError> {
    if depth > MAX_DEPTH {
        return Err(CanonicalError::MaxDepthExceeded {
            max_depth: MAX_DEPTH,
        });
    }

    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.push_str(&i.to_string());
            } else if n.as_u64().is_some() {
                // u64 values above i64::MAX are representable in serde_json
                // but not in the profile.
                return Err(CanonicalError::NumberOutOfRange {
                    value: n.to_string(),
                });
            } else {
                return Err(CanonicalError::FloatNotAllowed);
            }
        },
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item, depth + 1)?;
            }
            out.push(']');
        },
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable_by(|a, b| a.as_bytes().cmp(b.as_bytes()));

            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, &map[key.as_str()], depth + 1)?;
            }
            out.push('}');
        },
    }
    Ok(())
}

/// Writes a JSON string token with minimal escaping.
///
/// serde_json escapes exactly the JCS-required set: `"` and `\`, the named
/// control shorthands, and `\u00XX` for remaining control characters.
fn write_string(out: &mut String, s: &str) {
    // Infallible: serializing a plain string cannot fail.
    let escaped = serde_json::to_string(s).unwrap_or_else(|_| String::from("\"\""));
    out.push_str(&escaped);
}
