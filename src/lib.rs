//! Canopy library entry point.
//!
//! Canopy is a centralized agent registry and discovery service for
//! agent-to-agent ecosystems. Producers publish self-describing Agent Cards;
//! consumers discover agents through list, search, and well-known endpoints.
//! The registry enforces tenant isolation, public-vs-entitled visibility, and
//! federates with peer registries by periodic pull synchronization.
//!
//! External collaborators (the relational store, the document index, the
//! key-value cache, the token verifier, the clock) are consumed through trait
//! ports with in-memory adapters suitable for embedded deployments and tests.

#![warn(missing_docs)]

/// Authorization gate: token verification and role/scope/tenant checks.
pub mod authz;
/// Agent Card validation, canonicalization, and remote fetching.
pub mod card;
/// Response cache port, key schema, and in-memory TTL cache.
pub mod cache;
/// Clock port with system and manual implementations.
pub mod clock;
/// Centralized application configuration.
pub mod config;
/// Per-request deadline and correlation context.
pub mod context;
/// Discovery surface: list, search, get, and well-known queries.
pub mod discovery;
/// Entitlement management with cache invalidation.
pub mod entitlements;
/// The closed error taxonomy returned by every service operation.
pub mod error;
/// Peer registry federation: scheduling and pull synchronization.
pub mod federation;
/// Search index port, in-memory index, and the queued index writer.
pub mod index;
/// Sliding-window request rate limiting.
pub mod limiter;
/// Publish pipeline: validate, dedupe, version, persist, index, invalidate.
pub mod publish;
/// HTTP boundary: router, handlers, and error mapping.
pub mod server;
/// Application state wiring and component lifecycle.
pub mod state;
/// Persistence ports and the in-memory store.
pub mod store;
/// Core domain types: ids, cards, records, principals, peers, pagination.
pub mod types;

pub use error::RegistryError;
pub use error::Result;
pub use state::AppState;
