// Request validation - gates the pipeline before any signing or network work.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::proxy::error::ProxyError;
use crate::proxy::signing::stringify_value;

/// Inbound invoke payload: an upstream operation name plus caller parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyRequest {
    pub method: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, Value>,
}

/// One allow-listed upstream method and the fields it requires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodSpec {
    pub name: String,
    #[serde(default)]
    pub required: Vec<String>,
}

/// The fixed method allow-list. Unknown methods are rejected before any
/// canonicalization or network I/O.
#[derive(Debug, Clone)]
pub struct MethodRegistry {
    methods: HashMap<String, Vec<String>>,
    max_value_len: usize,
}

impl MethodRegistry {
    pub fn new(specs: &[MethodSpec], max_value_len: usize) -> Self {
        let methods = specs
            .iter()
            .map(|s| (s.name.clone(), s.required.clone()))
            .collect();
        Self {
            methods,
            max_value_len,
        }
    }

    /// Allow-listed methods with their required fields, for the discovery
    /// endpoint.
    pub fn specs(&self) -> Vec<MethodSpec> {
        let mut specs: Vec<MethodSpec> = self
            .methods
            .iter()
            .map(|(name, required)| MethodSpec {
                name: name.clone(),
                required: required.clone(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Synchronous, side-effect-free precheck. On rejection returns the full
    /// field-level list of problems so the caller can fix them in one pass.
    pub fn validate(&self, request: &ProxyRequest) -> Result<(), ProxyError> {
        if request.method.is_empty() {
            return Err(ProxyError::InvalidRequest {
                message: "method is required".to_string(),
                fields: vec!["method".to_string()],
            });
        }

        let Some(required) = self.methods.get(&request.method) else {
            return Err(ProxyError::InvalidRequest {
                message: format!("unknown method '{}'", request.method),
                fields: vec!["method".to_string()],
            });
        };

        let mut bad_fields = Vec::new();

        for field in required {
            let present = request
                .parameters
                .get(field)
                .and_then(stringify_value)
                .map(|v| !v.is_empty())
                .unwrap_or(false);
            if !present {
                bad_fields.push(field.clone());
            }
        }

        for (key, value) in &request.parameters {
            match stringify_value(value) {
                Some(text) => {
                    if text.len() > self.max_value_len || text.chars().any(|c| c.is_control()) {
                        bad_fields.push(key.clone());
                    }
                }
                // Nulls, arrays and objects cannot be canonicalized.
                None => bad_fields.push(key.clone()),
            }
        }

        if bad_fields.is_empty() {
            Ok(())
        } else {
            bad_fields.sort();
            bad_fields.dedup();
            Err(ProxyError::InvalidRequest {
                message: "missing or invalid fields".to_string(),
                fields: bad_fields,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> MethodRegistry {
        MethodRegistry::new(
            &[
                MethodSpec {
                    name: "affiliate.product.query".to_string(),
                    required: vec!["keywords".to_string()],
                },
                MethodSpec {
                    name: "affiliate.hotproduct.query".to_string(),
                    required: vec![],
                },
            ],
            64,
        )
    }

    fn request(method: &str, params: &[(&str, Value)]) -> ProxyRequest {
        ProxyRequest {
            method: method.to_string(),
            parameters: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn accepts_valid_request() {
        let req = request("affiliate.product.query", &[("keywords", json!("headphones"))]);
        assert!(registry().validate(&req).is_ok());
    }

    #[test]
    fn rejects_unknown_method() {
        let req = request("affiliate.order.cancel", &[]);
        let err = registry().validate(&req).unwrap_err();
        match err {
            ProxyError::InvalidRequest { fields, .. } => {
                assert_eq!(fields, vec!["method".to_string()])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_missing_required_field() {
        let req = request("affiliate.product.query", &[("page_no", json!(1))]);
        let err = registry().validate(&req).unwrap_err();
        match err {
            ProxyError::InvalidRequest { fields, .. } => {
                assert_eq!(fields, vec!["keywords".to_string()])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn method_without_required_fields_accepts_empty_params() {
        let req = request("affiliate.hotproduct.query", &[]);
        assert!(registry().validate(&req).is_ok());
    }

    #[test]
    fn rejects_control_characters() {
        let req = request(
            "affiliate.product.query",
            &[("keywords", json!("head\u{0000}phones"))],
        );
        let err = registry().validate(&req).unwrap_err();
        match err {
            ProxyError::InvalidRequest { fields, .. } => {
                assert_eq!(fields, vec!["keywords".to_string()])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_oversized_value() {
        let req = request("affiliate.product.query", &[("keywords", json!("x".repeat(65)))]);
        assert!(registry().validate(&req).is_err());
    }

    #[test]
    fn rejects_non_scalar_values() {
        let req = request(
            "affiliate.product.query",
            &[("keywords", json!("ok")), ("filters", json!({"a": 1}))],
        );
        let err = registry().validate(&req).unwrap_err();
        match err {
            ProxyError::InvalidRequest { fields, .. } => {
                assert_eq!(fields, vec!["filters".to_string()])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn collects_all_problem_fields_at_once() {
        let req = request(
            "affiliate.product.query",
            &[("filters", json!([1, 2])), ("note", json!("a\tb"))],
        );
        let err = registry().validate(&req).unwrap_err();
        match err {
            ProxyError::InvalidRequest { fields, .. } => {
                assert_eq!(
                    fields,
                    vec![
                        "filters".to_string(),
                        "keywords".to_string(),
                        "note".to_string()
                    ]
                )
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
