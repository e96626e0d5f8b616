//! Core domain types.

pub mod agent;
pub mod card;
pub mod page;
pub mod peer;
pub mod principal;

pub use agent::AgentId;
pub use agent::AgentRecord;
pub use agent::AgentVersion;
pub use agent::CardSource;
pub use agent::ContentHash;
pub use agent::Entitlement;
pub use agent::EntitlementSubject;
pub use agent::Publisher;
pub use agent::PublisherId;
pub use agent::TenantId;
pub use agent::VersionId;
pub use card::AgentCard;
pub use card::AgentCapabilities;
pub use card::AgentInterface;
pub use card::AgentProvider;
pub use card::AgentSkill;
pub use card::CardSignature;
pub use card::SecurityScheme;
pub use page::Cursor;
pub use page::Page;
pub use page::clamp_limit;
pub use peer::PeerId;
pub use peer::PeerRegistry;
pub use peer::PeerStatus;
pub use peer::SyncOutcome;
pub use peer::SyncRun;
pub use peer::SyncTrigger;
pub use principal::Principal;
pub use principal::PrincipalKind;
pub use principal::Role;
