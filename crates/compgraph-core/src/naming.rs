//! Deterministic record keys for graph nodes.
//!
//! A key is `<name>-<version>-<hash>`: the sanitized name and version keep it
//! readable, the hash (SHA-256 over the canonical JSON of name, version and
//! identity) keeps distinct identities apart. Identity is a `BTreeMap`, so
//! insertion order never reaches the hash.

use crate::error::{Error, Result};
use crate::types::Identity;
use ring::digest;
use serde::Serialize;

/// Upper bound on key length (DNS subdomain limit).
pub const MAX_KEY_LEN: usize = 253;

/// Hex characters of the hash kept in the key.
const HASH_LEN: usize = 16;

#[derive(Serialize)]
struct NamingScheme<'a> {
    component_name: &'a str,
    version: &'a str,
    identity: &'a Identity,
}

/// Construct a unique record key from a component name, version and identity.
pub fn compute_key(name: &str, version: &str, identity: &Identity) -> Result<String> {
    let scheme = NamingScheme {
        component_name: name,
        version,
        identity,
    };
    let canonical = serde_json::to_vec(&scheme).map_err(|e| {
        Error::Naming(format!(
            "failed to serialize name, version, identity for {name}:{version}: {e}"
        ))
    })?;
    let hash = hex::encode(digest::digest(&digest::SHA256, &canonical).as_ref());
    let suffix = &hash[..HASH_LEN];

    let mut prefix = sanitize(&format!("{name}-{version}"));
    let budget = MAX_KEY_LEN - HASH_LEN - 1;
    if prefix.len() > budget {
        prefix.truncate(budget);
        prefix = prefix.trim_end_matches(&['-', '.'][..]).to_string();
    }

    if prefix.is_empty() {
        Ok(suffix.to_string())
    } else {
        Ok(format!("{prefix}-{suffix}"))
    }
}

/// Lowercase, map anything outside `[a-z0-9.-]` to `-`, collapse runs of `-`.
fn sanitize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        let c = c.to_ascii_lowercase();
        let mapped = if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' {
            c
        } else {
            '-'
        };
        if mapped == '-' && out.ends_with('-') {
            continue;
        }
        out.push(mapped);
    }
    out.trim_matches(&['-', '.'][..]).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(pairs: &[(&str, &str)]) -> Identity {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn key_is_readable() {
        let key = compute_key("github.com/acme/podinfo", "v1.2.0", &Identity::new()).unwrap();
        assert!(key.starts_with("github.com-acme-podinfo-v1.2.0-"), "{key}");
        assert_eq!(key.len(), "github.com-acme-podinfo-v1.2.0-".len() + HASH_LEN);
    }

    #[test]
    fn identity_changes_key() {
        let plain = compute_key("acme/redis", "v1", &Identity::new()).unwrap();
        let with = compute_key("acme/redis", "v1", &identity(&[("role", "cache")])).unwrap();
        let other = compute_key("acme/redis", "v1", &identity(&[("role", "queue")])).unwrap();
        assert_ne!(plain, with);
        assert_ne!(with, other);
    }

    #[test]
    fn version_and_name_boundaries_do_not_collide() {
        // Same sanitized prefix, different triple.
        let a = compute_key("a-b", "c", &Identity::new()).unwrap();
        let b = compute_key("a", "b-c", &Identity::new()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn long_names_are_truncated_but_keep_hash() {
        let name = "x".repeat(400);
        let key = compute_key(&name, "v1", &Identity::new()).unwrap();
        assert!(key.len() <= MAX_KEY_LEN);
        let other = compute_key(&name, "v2", &Identity::new()).unwrap();
        assert_ne!(key, other);
    }

    #[test]
    fn sanitize_strips_and_collapses() {
        assert_eq!(sanitize("Acme//Thing__X"), "acme-thing-x");
        assert_eq!(sanitize("--a--"), "a");
    }
}
