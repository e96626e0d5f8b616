//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::DateTime;
use serde_json::json;
use serde_json::Value;

use canopy::authz::StaticTokenVerifier;
use canopy::authz::VerifiedToken;
use canopy::authz::SCOPE_ADMIN;
use canopy::authz::SCOPE_READ;
use canopy::authz::SCOPE_WRITE;
use canopy::clock::ManualClock;
use canopy::config::AppConfig;
use canopy::state::AppState;

/// Bearer token of a CatalogManager in tenant-a.
pub const TOKEN_MANAGER_A: &str = "token-manager-a";
/// Bearer token of a plain user in tenant-a.
pub const TOKEN_USER_A: &str = "token-user-a";
/// Bearer token of a plain user in tenant-b.
pub const TOKEN_USER_B: &str = "token-user-b";
/// Bearer token of an administrator in tenant-a.
pub const TOKEN_ADMIN_A: &str = "token-admin-a";

fn claims(sub: &str, tenant: &str, roles: &[&str], scopes: &[&str]) -> VerifiedToken {
    VerifiedToken {
        sub: sub.to_string(),
        tenant: tenant.to_string(),
        roles: roles.iter().map(|s| s.to_string()).collect(),
        scopes: scopes.iter().map(|s| s.to_string()).collect(),
        exp: None,
        consumer: None,
        service: false,
    }
}

/// A fully wired in-memory app state with a deterministic clock and the
/// standard token table. Background workers are started.
pub fn test_state() -> (AppState, Arc<ManualClock>) {
    let verifier = StaticTokenVerifier::new();
    verifier.insert(
        TOKEN_MANAGER_A,
        claims(
            "manager-a",
            "tenant-a",
            &["catalog_manager"],
            &[SCOPE_READ, SCOPE_WRITE],
        ),
    );
    verifier.insert(
        TOKEN_USER_A,
        claims("user-a", "tenant-a", &["user"], &[SCOPE_READ]),
    );
    verifier.insert(
        TOKEN_USER_B,
        claims("user-b", "tenant-b", &["user"], &[SCOPE_READ]),
    );
    verifier.insert(
        TOKEN_ADMIN_A,
        claims(
            "admin-a",
            "tenant-a",
            &["administrator"],
            &[SCOPE_READ, SCOPE_WRITE, SCOPE_ADMIN],
        ),
    );

    let clock = Arc::new(ManualClock::new(
        DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
    ));
    let state = AppState::with_clock(AppConfig::defaults(), Arc::new(verifier), clock.clone())
        .expect("state wiring");
    state.start();
    (state, clock)
}

/// A minimal valid card for `name`, published by `manager-a` unless a
/// provider organization is given.
pub fn card(name: &str, version: &str) -> Value {
    json!({
        "name": name,
        "description": format!("{name} helps with recipes and meal planning"),
        "url": "https://agents.example.com/recipe",
        "version": version,
        "capabilities": {"streaming": true},
        "securitySchemes": [
            {"type": "oauth2", "flow": "client_credentials",
             "tokenUrl": "https://auth.example.com/token"}
        ],
        "skills": [
            {"id": "find-recipe", "name": "Find recipe",
             "description": "Finds recipes by ingredients",
             "tags": ["cooking", "recipes"]}
        ],
        "interface": {
            "preferredTransport": "jsonrpc",
            "defaultInputModes": ["text/plain"],
            "defaultOutputModes": ["application/json"]
        }
    })
}

/// Resolve a token into a Principal through the state's own gate.
pub async fn principal_for(state: &AppState, token: &str) -> canopy::types::Principal {
    state
        .authz
        .authenticate(Some(token))
        .await
        .expect("token resolves")
        .expect("principal present")
}
