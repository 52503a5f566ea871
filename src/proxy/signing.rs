// Canonical parameter construction and request signing.
//
// The upstream API authenticates with a digest over the sorted parameter set,
// so a single byte out of order here produces silent auth failures upstream.
// Everything in this module is deterministic and side-effect free.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Protocol version sent with every request.
pub const PROTOCOL_VERSION: &str = "2.0";
/// Response format requested from upstream.
pub const RESPONSE_FORMAT: &str = "json";
/// Signature method tag sent with every request.
pub const SIGN_METHOD: &str = "sha256";

/// Parameters injected by the proxy, never supplied by the caller.
/// On a key collision the system value overwrites the caller value.
#[derive(Debug, Clone)]
pub struct SystemParams {
    pub app_key: String,
    /// Seconds since epoch, generated at request time.
    pub timestamp: i64,
}

impl SystemParams {
    pub fn now(app_key: &str) -> Self {
        Self {
            app_key: app_key.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    #[cfg(test)]
    pub fn fixed(app_key: &str, timestamp: i64) -> Self {
        Self {
            app_key: app_key.to_string(),
            timestamp,
        }
    }
}

/// Converts a caller-supplied scalar into its canonical wire string.
///
/// One rule per type: strings verbatim, integers verbatim, floats through
/// Rust's shortest representation (no trailing zeros), booleans lowercase.
/// Returns `None` for nulls, arrays and objects; the validator rejects those
/// before canonicalization, so a `None` here means a bug upstream of us.
pub fn stringify_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                // Rust's float Display is the shortest round-trippable form,
                // so 2.0 canonicalizes to "2" and 1.5 stays "1.5".
                n.as_f64().map(|f| format!("{f}"))
            }
        }
        Value::Bool(b) => Some(if *b { "true" } else { "false" }.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// The merged, sorted, stringified parameter set used as signing input.
///
/// Keys are unique and ordered by raw bytes (`String`'s `Ord`), never by
/// locale, so the same logical request canonicalizes identically on every
/// runtime.
#[derive(Debug, Clone)]
pub struct CanonicalParams {
    pairs: Vec<(String, String)>,
}

impl CanonicalParams {
    /// Two-phase merge: caller parameters first, then the system set applied
    /// on top so the override rule is explicit rather than an artifact of map
    /// iteration order. An empty caller set is valid and yields the system
    /// parameters alone.
    pub fn build(
        method: &str,
        caller: &serde_json::Map<String, Value>,
        system: &SystemParams,
        sign_empty_values: bool,
    ) -> Self {
        let mut merged: BTreeMap<String, String> = BTreeMap::new();

        // Phase 1: caller input.
        for (key, value) in caller {
            if let Some(text) = stringify_value(value) {
                if text.is_empty() && !sign_empty_values {
                    continue;
                }
                merged.insert(key.clone(), text);
            }
        }

        // Phase 2: system parameters win on collision.
        merged.insert("method".to_string(), method.to_string());
        merged.insert("app_key".to_string(), system.app_key.clone());
        merged.insert("timestamp".to_string(), system.timestamp.to_string());
        merged.insert("format".to_string(), RESPONSE_FORMAT.to_string());
        merged.insert("v".to_string(), PROTOCOL_VERSION.to_string());
        merged.insert("sign_method".to_string(), SIGN_METHOD.to_string());

        Self {
            pairs: merged.into_iter().collect(),
        }
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }
}

/// Holds the shared secret and computes request signatures.
///
/// Stateless apart from the credential pair; safe to share across tasks.
/// The secret and the pre-digest base string never leave this type: not in
/// logs, not in errors, not in `Debug` output.
pub struct SignatureEngine {
    app_key: String,
    secret: String,
    sign_empty_values: bool,
}

impl std::fmt::Debug for SignatureEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureEngine")
            .field("app_key", &self.app_key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl SignatureEngine {
    pub fn new(app_key: String, secret: String, sign_empty_values: bool) -> Self {
        Self {
            app_key,
            secret,
            sign_empty_values,
        }
    }

    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    /// Concatenate each key+value pair in sorted order with no separators,
    /// append the secret, SHA-256 the UTF-8 bytes, render uppercase hex.
    pub fn sign(&self, canonical: &CanonicalParams) -> String {
        let mut base = String::new();
        for (key, value) in canonical.pairs() {
            base.push_str(key);
            base.push_str(value);
        }
        base.push_str(&self.secret);

        let digest = Sha256::digest(base.as_bytes());
        hex::encode_upper(digest)
    }

    /// Build the full signed parameter set ready for the wire: the canonical
    /// pairs plus the `sign` field. The signature is excluded from its own
    /// input by construction.
    pub fn build_signed(
        &self,
        method: &str,
        caller: &serde_json::Map<String, Value>,
        system: &SystemParams,
    ) -> ForwardedRequest {
        let canonical = CanonicalParams::build(method, caller, system, self.sign_empty_values);
        let signature = self.sign(&canonical);

        let mut pairs = canonical.pairs.clone();
        pairs.push(("sign".to_string(), signature));

        ForwardedRequest {
            method: method.to_string(),
            pairs,
        }
    }
}

/// Signed parameter set as it goes on the wire. Immutable once built.
#[derive(Debug, Clone)]
pub struct ForwardedRequest {
    pub method: String,
    pub pairs: Vec<(String, String)>,
}
