use sha2::{Digest, Sha256};

use super::convert::render_number;
use super::{Kind, Value};

/// Stable content hash of a value, as lowercase hex.
///
/// The digest covers the value's kind tags and contents; it does not cover
/// the declared type beyond what the contents imply, so the hash is stable
/// across re-decodes of the same configuration. Used by the reconciler for
/// change detection.
pub fn hash(value: &Value) -> String {
    let mut hasher = Sha256::new();
    feed(value, &mut hasher);
    hex::encode(hasher.finalize())
}

fn feed(value: &Value, hasher: &mut Sha256) {
    match &value.kind {
        Kind::Bool(b) => {
            hasher.update([b'b', u8::from(*b)]);
        }
        Kind::Number(n) => {
            hasher.update(b"n");
            hasher.update(render_number(n).as_bytes());
            hasher.update([0]);
        }
        Kind::String(s) => {
            hasher.update(b"s");
            hasher.update((s.len() as u64).to_be_bytes());
            hasher.update(s.as_bytes());
        }
        Kind::List(items) | Kind::Tuple(items) => {
            hasher.update(b"l");
            hasher.update((items.len() as u64).to_be_bytes());
            for item in items {
                feed(item, hasher);
            }
        }
        Kind::Set(items) => {
            // Order-insensitive: element digests are sorted before feeding.
            let mut digests: Vec<String> = items.iter().map(hash).collect();
            digests.sort();
            hasher.update(b"t");
            hasher.update((digests.len() as u64).to_be_bytes());
            for d in digests {
                hasher.update(d.as_bytes());
            }
        }
        Kind::Map(entries) | Kind::Object(entries) => {
            hasher.update(b"m");
            hasher.update((entries.len() as u64).to_be_bytes());
            for (k, v) in entries {
                hasher.update((k.len() as u64).to_be_bytes());
                hasher.update(k.as_bytes());
                feed(v, hasher);
            }
        }
        Kind::Null => {
            hasher.update(b"z");
        }
        Kind::Unknown => {
            hasher.update(b"u");
        }
        Kind::Capsule(_) => {
            // Capsules never reach hashing in a decoded graph; hash as
            // unknown so a stray one at least hashes deterministically.
            hasher.update(b"u");
        }
    }
}
