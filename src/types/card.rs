//! The Agent Card wire type.
//!
//! Cards are the external contract: self-contained JSON documents describing
//! an agent's endpoint, capabilities, skills, and authentication. Unknown
//! fields are preserved verbatim through flattened maps so forward-compatible
//! extensions survive a round trip through the registry.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

/// Maximum accepted card size, measured over canonical JSON bytes.
pub const MAX_CARD_BYTES: usize = 256 * 1024;

/// Accepted security scheme types.
pub const SECURITY_SCHEME_TYPES: [&str; 4] = ["apiKey", "oauth2", "jwt", "mTLS"];

/// Accepted OAuth2 flows.
pub const OAUTH2_FLOWS: [&str; 3] = ["client_credentials", "authorization_code", "password"];

/// Accepted preferred transports.
pub const TRANSPORTS: [&str; 3] = ["jsonrpc", "grpc", "http"];

/// A validated Agent Card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    /// Agent name, unique per publisher.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Absolute endpoint URL.
    pub url: String,
    /// Semver version string.
    pub version: String,
    /// Boolean capability flags.
    pub capabilities: AgentCapabilities,
    /// Supported authentication schemes.
    pub security_schemes: Vec<SecurityScheme>,
    /// Declared skills.
    pub skills: Vec<AgentSkill>,
    /// Transport and content negotiation contract.
    pub interface: AgentInterface,
    /// Producing organization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<AgentProvider>,
    /// Link to agent documentation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation_url: Option<String>,
    /// Detached JWS over the card.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<CardSignature>,
    /// Forward-compatible extension fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Capability flags. Known flags default to false; unknown flags are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    /// Server-sent streaming of task updates.
    #[serde(default)]
    pub streaming: bool,
    /// Push notification delivery.
    #[serde(default)]
    pub push_notifications: bool,
    /// Protocol extension negotiation.
    #[serde(default)]
    pub extensions: bool,
    /// Extended card retrieval for authenticated callers.
    #[serde(default)]
    pub extended_agent_card: bool,
    /// Unknown flags, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AgentCapabilities {
    /// Known flags plus any extra boolean flags, for index projection.
    pub fn as_flags(&self) -> std::collections::BTreeMap<String, bool> {
        let mut flags = std::collections::BTreeMap::new();
        flags.insert("streaming".to_string(), self.streaming);
        flags.insert("pushNotifications".to_string(), self.push_notifications);
        flags.insert("extensions".to_string(), self.extensions);
        flags.insert("extendedAgentCard".to_string(), self.extended_agent_card);
        for (key, value) in &self.extra {
            if let Value::Bool(b) = value {
                flags.insert(key.clone(), *b);
            }
        }
        flags
    }
}

/// A declared authentication scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityScheme {
    /// One of `apiKey`, `oauth2`, `jwt`, `mTLS`.
    #[serde(rename = "type")]
    pub scheme_type: String,
    /// OAuth2 flow; required when `type` is `oauth2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
    /// OAuth2 token endpoint; required when `type` is `oauth2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    /// API key parameter name; required when `type` is `apiKey`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Where the API key travels (`header`, `query`); required for `apiKey`.
    #[serde(rename = "in", default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// JWT format hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_format: Option<String>,
    /// Preserved extension fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A skill the agent advertises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSkill {
    /// Skill id, unique within the card.
    pub id: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// What the skill does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Non-empty tag list.
    pub tags: Vec<String>,
    /// Example invocations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
    /// Preserved extension fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Transport and content negotiation contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInterface {
    /// One of `jsonrpc`, `grpc`, `http`.
    pub preferred_transport: String,
    /// Accepted input media types; non-empty.
    pub default_input_modes: Vec<String>,
    /// Produced output media types; non-empty.
    pub default_output_modes: Vec<String>,
    /// Preserved extension fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Producing organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProvider {
    /// Organization name; checked against the publisher's display name.
    pub organization: String,
    /// Organization home page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Preserved extension fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Detached JWS signature over the card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardSignature {
    /// Base64url-encoded protected header.
    pub protected: String,
    /// Base64url-encoded signature bytes.
    pub signature: String,
    /// JWKS endpoint advertising the signing keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_url: Option<String>,
    /// Unprotected header, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<Value>,
}

impl AgentCard {
    /// Combined free-text for the search index: name, description, and
    /// per-skill names, descriptions, and tags.
    pub fn full_text(&self) -> String {
        let mut text = String::with_capacity(128);
        text.push_str(&self.name);
        text.push(' ');
        text.push_str(&self.description);
        for skill in &self.skills {
            text.push(' ');
            text.push_str(&skill.id);
            if let Some(name) = &skill.name {
                text.push(' ');
                text.push_str(name);
            }
            if let Some(description) = &skill.description {
                text.push(' ');
                text.push_str(description);
            }
            for tag in &skill.tags {
                text.push(' ');
                text.push_str(tag);
            }
        }
        text
    }

    /// All skill tags, deduplicated, in first-seen order.
    pub fn all_tags(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut tags = Vec::new();
        for skill in &self.skills {
            for tag in &skill.tags {
                if seen.insert(tag.clone()) {
                    tags.push(tag.clone());
                }
            }
        }
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_card_json() -> Value {
        json!({
            "name": "recipe-agent",
            "description": "Finds and adapts recipes",
            "url": "https://agents.example.com/recipe",
            "version": "1.0.0",
            "capabilities": {"streaming": true, "experimentalBatching": true},
            "securitySchemes": [
                {"type": "oauth2", "flow": "client_credentials",
                 "tokenUrl": "https://auth.example.com/token"}
            ],
            "skills": [
                {"id": "find-recipe", "name": "Find recipe",
                 "tags": ["cooking", "search"]}
            ],
            "interface": {
                "preferredTransport": "jsonrpc",
                "defaultInputModes": ["text/plain"],
                "defaultOutputModes": ["application/json"]
            },
            "provider": {"organization": "Example Kitchens"},
            "x-vendor-hint": {"tier": "gold"}
        })
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let card: AgentCard = serde_json::from_value(sample_card_json()).unwrap();
        assert!(card.extra.contains_key("x-vendor-hint"));
        assert_eq!(card.capabilities.extra["experimentalBatching"], json!(true));

        let back = serde_json::to_value(&card).unwrap();
        assert_eq!(back["x-vendor-hint"]["tier"], "gold");
        assert_eq!(back["capabilities"]["experimentalBatching"], json!(true));
    }

    #[test]
    fn test_capability_flags_include_extras() {
        let card: AgentCard = serde_json::from_value(sample_card_json()).unwrap();
        let flags = card.capabilities.as_flags();
        assert_eq!(flags["streaming"], true);
        assert_eq!(flags["pushNotifications"], false);
        assert_eq!(flags["experimentalBatching"], true);
    }

    #[test]
    fn test_full_text_covers_skills() {
        let card: AgentCard = serde_json::from_value(sample_card_json()).unwrap();
        let text = card.full_text();
        assert!(text.contains("recipe-agent"));
        assert!(text.contains("cooking"));
        assert_eq!(card.all_tags(), vec!["cooking", "search"]);
    }
}
