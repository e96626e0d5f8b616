//! Federation (C10): peer registries and pull synchronization.
//!
//! Peers advertise their public agents through the same well-known index
//! this registry serves. The sync pass diffs the advertised set against the
//! locally stored federated set and reconciles: new or changed cards are
//! fetched, validated, and upserted under the synthetic publisher
//! `peer:{name}`; entries the peer no longer advertises are retracted.
//!
//! Federated entries never collide with local agents because their publisher
//! namespace is `peer:*`; two peers advertising the same upstream produce
//! two distinct records by design.

pub mod manager;
pub mod sync;

pub use manager::FederationManager;
pub use sync::FederationSync;
pub use sync::SyncError;
