//! Deterministic session keys.
//!
//! One logical terminal target (kind + parameter set) must always map to
//! the same key so that every transport connection for that target lands
//! on the same live session.

use std::collections::BTreeMap;

/// Key identifying one logical terminal target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    /// Derive the key for `kind` with `params`.
    ///
    /// Parameters are composed in sorted name order (a `BTreeMap` iterates
    /// sorted), so the key is independent of how the caller assembled the
    /// map. A kind with no parameters keys on the kind alone.
    pub fn derive(kind: &str, params: &BTreeMap<String, String>) -> Self {
        if params.is_empty() {
            return Self(kind.to_string());
        }
        let mut out = String::from(kind);
        for (name, value) in params {
            out.push(':');
            out.push_str(name);
            out.push('=');
            out.push_str(value);
        }
        Self(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameterless_kind_keys_on_kind_alone() {
        let key = SessionKey::derive("system", &BTreeMap::new());
        assert_eq!(key.as_str(), "system");
    }

    #[test]
    fn key_is_insensitive_to_insertion_order() {
        let mut a = BTreeMap::new();
        a.insert("namespace".to_string(), "default".to_string());
        a.insert("pod".to_string(), "web-1".to_string());

        let mut b = BTreeMap::new();
        b.insert("pod".to_string(), "web-1".to_string());
        b.insert("namespace".to_string(), "default".to_string());

        assert_eq!(SessionKey::derive("k8s", &a), SessionKey::derive("k8s", &b));
        assert_eq!(
            SessionKey::derive("k8s", &a).as_str(),
            "k8s:namespace=default:pod=web-1"
        );
    }

    #[test]
    fn different_params_yield_different_keys() {
        let mut a = BTreeMap::new();
        a.insert("container".to_string(), "redis".to_string());
        let mut b = BTreeMap::new();
        b.insert("container".to_string(), "postgres".to_string());

        assert_ne!(
            SessionKey::derive("docker", &a),
            SessionKey::derive("docker", &b)
        );
    }
}
