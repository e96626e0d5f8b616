//! Agent Card validation (C1).
//!
//! The validator walks the raw JSON value and accumulates every violation
//! instead of stopping at the first, then canonicalizes and hashes the
//! accepted card. Signature checks here are structural only; cryptographic
//! verification happens in the publish pipeline when a JWKS URL is present.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;
use url::Url;

use super::canonical::canonical_json;
use super::canonical::content_hash;
use crate::error::CardViolation;
use crate::types::card::MAX_CARD_BYTES;
use crate::types::card::OAUTH2_FLOWS;
use crate::types::card::SECURITY_SCHEME_TYPES;
use crate::types::card::TRANSPORTS;
use crate::types::AgentCard;
use crate::types::ContentHash;

/// A card that passed validation, with its canonical form and hash.
#[derive(Debug, Clone)]
pub struct ValidCard {
    /// Typed view of the card.
    pub card: AgentCard,
    /// The card exactly as submitted.
    pub raw: Value,
    /// Canonical JSON bytes.
    pub canonical: String,
    /// SHA-256 of the canonical bytes.
    pub content_hash: ContentHash,
}

/// Stateless Agent Card validator.
#[derive(Debug, Default, Clone, Copy)]
pub struct CardValidator;

impl CardValidator {
    /// Validate `raw`, returning the canonicalized card or every violation
    /// found.
    pub fn validate(&self, raw: &Value) -> Result<ValidCard, Vec<CardViolation>> {
        let mut violations = Vec::new();

        let Some(obj) = raw.as_object() else {
            return Err(vec![CardViolation::new("", "card must be a JSON object")]);
        };

        check_required_string(obj, "name", &mut violations);
        check_required_string(obj, "description", &mut violations);
        check_url(obj, &mut violations);
        check_version(obj, &mut violations);
        check_capabilities(obj, &mut violations);
        check_security_schemes(obj, &mut violations);
        check_skills(obj, &mut violations);
        check_interface(obj, &mut violations);
        check_provider(obj, &mut violations);
        check_signature(obj, &mut violations);

        let canonical = canonical_json(raw);
        if canonical.len() > MAX_CARD_BYTES {
            violations.push(CardViolation::new(
                "",
                format!("card exceeds {MAX_CARD_BYTES} canonical bytes"),
            ));
        }

        if !violations.is_empty() {
            return Err(violations);
        }

        let card: AgentCard = match serde_json::from_value(raw.clone()) {
            Ok(card) => card,
            Err(err) => {
                return Err(vec![CardViolation::new("", format!("malformed card: {err}"))]);
            }
        };

        let content_hash = content_hash(raw);
        Ok(ValidCard {
            card,
            raw: raw.clone(),
            canonical,
            content_hash,
        })
    }
}

fn check_required_string(
    obj: &serde_json::Map<String, Value>,
    field: &str,
    violations: &mut Vec<CardViolation>,
) {
    match obj.get(field) {
        None => violations.push(CardViolation::new(field, "required field is missing")),
        Some(Value::String(s)) if !s.trim().is_empty() => {}
        Some(Value::String(_)) => violations.push(CardViolation::new(field, "must be non-empty")),
        Some(_) => violations.push(CardViolation::new(field, "must be a string")),
    }
}

fn check_url(obj: &serde_json::Map<String, Value>, violations: &mut Vec<CardViolation>) {
    let Some(value) = obj.get("url") else {
        violations.push(CardViolation::new("url", "required field is missing"));
        return;
    };
    let Some(s) = value.as_str() else {
        violations.push(CardViolation::new("url", "must be a string"));
        return;
    };
    match Url::parse(s) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => {}
        Ok(_) => violations.push(CardViolation::new(
            "url",
            "must be an absolute http or https URL",
        )),
        Err(_) => violations.push(CardViolation::new("url", "must be a valid absolute URL")),
    }
}

fn check_version(obj: &serde_json::Map<String, Value>, violations: &mut Vec<CardViolation>) {
    let Some(value) = obj.get("version") else {
        violations.push(CardViolation::new("version", "required field is missing"));
        return;
    };
    let Some(s) = value.as_str() else {
        violations.push(CardViolation::new("version", "must be a string"));
        return;
    };
    if semver::Version::parse(s).is_err() {
        violations.push(CardViolation::new(
            "version",
            "must be a valid semver version",
        ));
    }
}

fn check_capabilities(obj: &serde_json::Map<String, Value>, violations: &mut Vec<CardViolation>) {
    let Some(value) = obj.get("capabilities") else {
        violations.push(CardViolation::new(
            "capabilities",
            "required field is missing",
        ));
        return;
    };
    let Some(caps) = value.as_object() else {
        violations.push(CardViolation::new("capabilities", "must be an object"));
        return;
    };
    // Known flags must be booleans when present; unknown flags pass through.
    for known in [
        "streaming",
        "pushNotifications",
        "extensions",
        "extendedAgentCard",
    ] {
        if let Some(flag) = caps.get(known) {
            if !flag.is_boolean() {
                violations.push(CardViolation::new(
                    format!("capabilities.{known}"),
                    "must be a boolean",
                ));
            }
        }
    }
}

fn check_security_schemes(
    obj: &serde_json::Map<String, Value>,
    violations: &mut Vec<CardViolation>,
) {
    let Some(value) = obj.get("securitySchemes") else {
        violations.push(CardViolation::new(
            "securitySchemes",
            "required field is missing",
        ));
        return;
    };
    let Some(schemes) = value.as_array() else {
        violations.push(CardViolation::new("securitySchemes", "must be an array"));
        return;
    };
    for (i, scheme) in schemes.iter().enumerate() {
        let path = format!("securitySchemes[{i}]");
        let Some(scheme) = scheme.as_object() else {
            violations.push(CardViolation::new(path, "must be an object"));
            continue;
        };
        let scheme_type = scheme.get("type").and_then(Value::as_str);
        match scheme_type {
            Some(t) if SECURITY_SCHEME_TYPES.contains(&t) => {}
            Some(t) => {
                violations.push(CardViolation::new(
                    format!("{path}.type"),
                    format!("unknown scheme type '{t}'"),
                ));
                continue;
            }
            None => {
                violations.push(CardViolation::new(
                    format!("{path}.type"),
                    "required field is missing",
                ));
                continue;
            }
        }
        match scheme_type {
            Some("oauth2") => {
                match scheme.get("flow").and_then(Value::as_str) {
                    Some(flow) if OAUTH2_FLOWS.contains(&flow) => {}
                    Some(flow) => violations.push(CardViolation::new(
                        format!("{path}.flow"),
                        format!("unknown oauth2 flow '{flow}'"),
                    )),
                    None => violations.push(CardViolation::new(
                        format!("{path}.flow"),
                        "required for oauth2 schemes",
                    )),
                }
                match scheme.get("tokenUrl").and_then(Value::as_str) {
                    Some(s) if !s.is_empty() => {}
                    _ => violations.push(CardViolation::new(
                        format!("{path}.tokenUrl"),
                        "required for oauth2 schemes",
                    )),
                }
            }
            Some("apiKey") => {
                for field in ["name", "in"] {
                    match scheme.get(field).and_then(Value::as_str) {
                        Some(s) if !s.is_empty() => {}
                        _ => violations.push(CardViolation::new(
                            format!("{path}.{field}"),
                            "required for apiKey schemes",
                        )),
                    }
                }
            }
            _ => {}
        }
    }
}

fn check_skills(obj: &serde_json::Map<String, Value>, violations: &mut Vec<CardViolation>) {
    let Some(value) = obj.get("skills") else {
        violations.push(CardViolation::new("skills", "required field is missing"));
        return;
    };
    let Some(skills) = value.as_array() else {
        violations.push(CardViolation::new("skills", "must be an array"));
        return;
    };
    let mut seen_ids = std::collections::HashSet::new();
    for (i, skill) in skills.iter().enumerate() {
        let path = format!("skills[{i}]");
        let Some(skill) = skill.as_object() else {
            violations.push(CardViolation::new(path, "must be an object"));
            continue;
        };
        match skill.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => {
                if !seen_ids.insert(id.to_string()) {
                    violations.push(CardViolation::new(
                        format!("{path}.id"),
                        format!("duplicate skill id '{id}'"),
                    ));
                }
            }
            _ => violations.push(CardViolation::new(
                format!("{path}.id"),
                "required and must be non-empty",
            )),
        }
        match skill.get("tags") {
            Some(Value::Array(tags)) if !tags.is_empty() => {
                if tags.iter().any(|t| !t.is_string()) {
                    violations.push(CardViolation::new(
                        format!("{path}.tags"),
                        "tags must be strings",
                    ));
                }
            }
            Some(Value::Array(_)) => violations.push(CardViolation::new(
                format!("{path}.tags"),
                "must be non-empty",
            )),
            _ => violations.push(CardViolation::new(
                format!("{path}.tags"),
                "required and must be a non-empty array",
            )),
        }
    }
}

fn check_interface(obj: &serde_json::Map<String, Value>, violations: &mut Vec<CardViolation>) {
    let Some(value) = obj.get("interface") else {
        violations.push(CardViolation::new("interface", "required field is missing"));
        return;
    };
    let Some(interface) = value.as_object() else {
        violations.push(CardViolation::new("interface", "must be an object"));
        return;
    };
    match interface.get("preferredTransport").and_then(Value::as_str) {
        Some(t) if TRANSPORTS.contains(&t) => {}
        Some(t) => violations.push(CardViolation::new(
            "interface.preferredTransport",
            format!("unknown transport '{t}'"),
        )),
        None => violations.push(CardViolation::new(
            "interface.preferredTransport",
            "required field is missing",
        )),
    }
    for field in ["defaultInputModes", "defaultOutputModes"] {
        match interface.get(field) {
            Some(Value::Array(modes)) if !modes.is_empty() => {}
            _ => violations.push(CardViolation::new(
                format!("interface.{field}"),
                "must be a non-empty array",
            )),
        }
    }
}

fn check_provider(obj: &serde_json::Map<String, Value>, violations: &mut Vec<CardViolation>) {
    let Some(value) = obj.get("provider") else {
        return;
    };
    let Some(provider) = value.as_object() else {
        violations.push(CardViolation::new("provider", "must be an object"));
        return;
    };
    match provider.get("organization").and_then(Value::as_str) {
        Some(s) if !s.is_empty() => {}
        _ => violations.push(CardViolation::new(
            "provider.organization",
            "required and must be non-empty",
        )),
    }
}

fn check_signature(obj: &serde_json::Map<String, Value>, violations: &mut Vec<CardViolation>) {
    let Some(value) = obj.get("signature") else {
        return;
    };
    let Some(signature) = value.as_object() else {
        violations.push(CardViolation::new("signature", "must be an object"));
        return;
    };
    for field in ["protected", "signature"] {
        match signature.get(field).and_then(Value::as_str) {
            Some(s) if !s.is_empty() => {
                if URL_SAFE_NO_PAD.decode(s.as_bytes()).is_err() {
                    violations.push(CardViolation::new(
                        format!("signature.{field}"),
                        "must be base64url without padding",
                    ));
                }
            }
            _ => violations.push(CardViolation::new(
                format!("signature.{field}"),
                "required and must be non-empty",
            )),
        }
    }
    if let Some(jwks) = signature.get("jwksUrl") {
        match jwks.as_str().map(Url::parse) {
            Some(Ok(url)) if url.scheme() == "https" => {}
            _ => violations.push(CardViolation::new(
                "signature.jwksUrl",
                "must be an https URL",
            )),
        }
    }
}
