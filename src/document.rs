//! Document model: the opaque field-name → value mapping replicated
//! between sides, plus the two operations that give it semantic meaning
//! to the engine — fingerprinting (content identity) and sanitization
//! (stripping side-local provenance before a transfer).

use md5::{Digest, Md5};
use serde_json::{Map, Value};

/// A replicated document. Top-level object; nested values may be any
/// JSON shape. The engine never inspects fields outside the small set
/// named below.
pub type Document = Map<String, Value>;

/// Fields excluded from [`fingerprint`] by default. Unioned with any
/// caller-supplied `exclude_fields` from `sync_rules.exclude_fields`.
pub const DEFAULT_EXCLUDED_FIELDS: &[&str] = &["modified", "modified_by", "creation", "owner", "idx"];

/// Fields stripped by [`sanitize`] before a document is written to the
/// receiving side — metadata the receiver assigns itself.
pub const SANITIZE_FIELDS: &[&str] = &[
    "name",
    "owner",
    "modified_by",
    "creation",
    "modified",
    "docstatus",
    "_user_tags",
    "_comments",
    "_assign",
    "_liked_by",
];

/// Deterministic MD5 hash over `doc`'s JSON serialization with the
/// default exclusions (unioned with `exclude_fields`) removed and object
/// keys sorted lexicographically at every nesting depth.
///
/// This is the engine's content-identity witness: stable across
/// insertion order and across processes, since it never depends on
/// `HashMap` iteration order.
pub fn fingerprint(doc: &Document, exclude_fields: &[String]) -> String {
    let mut clean = Map::new();
    for (k, v) in doc {
        if DEFAULT_EXCLUDED_FIELDS.contains(&k.as_str())
            || exclude_fields.iter().any(|f| f == k)
        {
            continue;
        }
        clean.insert(k.clone(), v.clone());
    }

    let canonical = canonicalize(&Value::Object(clean));
    // `serde_json` is built with `preserve_order`, so inserting keys in
    // sorted order below is enough to make `to_string` emit them sorted.
    let json = serde_json::to_string(&canonical).expect("canonical value always serializes");

    let mut hasher = Md5::new();
    hasher.update(json.as_bytes());
    hex::encode(hasher.finalize())
}

/// Recursively rebuild `value` with object keys in lexicographic order
/// at every depth. Arrays keep element order — only key order within
/// objects is canonicalized.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                out.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Strip [`SANITIZE_FIELDS`] (plus any application-configured
/// `exclude_fields`) from `doc` before handing it to the receiving
/// side's `create`/`update`. The receiver assigns these itself;
/// transmitting them causes the target to reject the write or overwrite
/// its own provenance.
pub fn sanitize(doc: &Document, exclude_fields: &[String]) -> Document {
    let mut clean = doc.clone();
    for field in SANITIZE_FIELDS {
        clean.remove(*field);
    }
    for field in exclude_fields {
        clean.remove(field.as_str());
    }
    clean
}

/// Read the `modified` system field as a `&str`, if present and a string.
pub fn modified_of(doc: &Document) -> Option<&str> {
    doc.get("modified").and_then(Value::as_str)
}

/// Read the `name` system field as a `&str`, if present and a string.
pub fn name_of(doc: &Document) -> Option<&str> {
    doc.get("name").and_then(Value::as_str)
}
