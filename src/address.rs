//! Content addressing using BLAKE3

use crate::types::{Capability, CONTENT_CAP_PREFIX, DIRECTORY_CAP_PREFIX};
use blake3::Hasher;

/// Compute the capability of a content blob.
///
/// Pure and deterministic: identical bytes always produce the identical
/// capability, and distinct bytes produce distinct capabilities under the
/// collision resistance of BLAKE3.
pub fn address(content: &[u8]) -> Capability {
    let mut hasher = Hasher::new();
    hasher.update(content);
    Capability::new(format!(
        "{}{}",
        CONTENT_CAP_PREFIX,
        hex::encode(hasher.finalize().as_bytes())
    ))
}

/// Compute the capability of an encoded linked directory.
///
/// The body must already be in canonical form (see
/// [`crate::store::encode_linked_directory`]).
pub fn address_directory(body: &[u8]) -> Capability {
    let mut hasher = Hasher::new();
    hasher.update(b"dir:");
    hasher.update(body);
    Capability::new(format!(
        "{}{}",
        DIRECTORY_CAP_PREFIX,
        hex::encode(hasher.finalize().as_bytes())
    ))
}
