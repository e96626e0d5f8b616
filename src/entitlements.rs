//! Entitlement management (C4 service face).
//!
//! Grants and revocations change what tenant readers may see, so both
//! invalidate the tenant's cached responses on the way out.

use std::sync::Arc;

use tracing::info;

use crate::cache::tenant_pattern;
use crate::cache::ResponseCache;
use crate::clock::Clock;
use crate::context::RequestContext;
use crate::error::RegistryError;
use crate::error::Result;
use crate::store::AgentStore;
use crate::store::EntitlementStore;
use crate::types::AgentId;
use crate::types::Entitlement;
use crate::types::EntitlementSubject;
use crate::types::Principal;
use crate::types::Role;

/// Grant/revoke operations with cache invalidation.
pub struct EntitlementService {
    agents: Arc<dyn AgentStore>,
    entitlements: Arc<dyn EntitlementStore>,
    cache: Arc<dyn ResponseCache>,
    clock: Arc<dyn Clock>,
}

impl EntitlementService {
    /// Wire the service over its ports.
    pub fn new(
        agents: Arc<dyn AgentStore>,
        entitlements: Arc<dyn EntitlementStore>,
        cache: Arc<dyn ResponseCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            agents,
            entitlements,
            cache,
            clock,
        }
    }

    /// Grant `subject` visibility of `agent_id` within the caller's tenant.
    ///
    /// Requires `CatalogManager` or stronger. The agent must exist in the
    /// caller's tenant; anything else is `NotFound`.
    pub async fn grant(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        subject: EntitlementSubject,
        agent_id: AgentId,
    ) -> Result<Entitlement> {
        ctx.check()?;
        self.authorize(principal, agent_id).await?;
        let entitlement = self
            .entitlements
            .grant(&principal.tenant, subject, agent_id, self.clock.now())
            .await?;
        self.invalidate(&principal.tenant).await;
        info!(agent_id = %agent_id, tenant = %principal.tenant, "entitlement granted");
        Ok(entitlement)
    }

    /// Revoke an active grant. Returns false when none existed.
    pub async fn revoke(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        subject: &EntitlementSubject,
        agent_id: AgentId,
    ) -> Result<bool> {
        ctx.check()?;
        self.authorize(principal, agent_id).await?;
        let revoked = self
            .entitlements
            .revoke(&principal.tenant, subject, agent_id, self.clock.now())
            .await?;
        if revoked {
            self.invalidate(&principal.tenant).await;
            info!(agent_id = %agent_id, tenant = %principal.tenant, "entitlement revoked");
        }
        Ok(revoked)
    }

    /// All grants on an agent in the caller's tenant, active and revoked.
    pub async fn list_for_agent(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        agent_id: AgentId,
    ) -> Result<Vec<Entitlement>> {
        ctx.check()?;
        self.authorize(principal, agent_id).await?;
        Ok(self.entitlements.list_for_agent(agent_id).await?)
    }

    async fn authorize(&self, principal: &Principal, agent_id: AgentId) -> Result<()> {
        if !principal.has_role(Role::CatalogManager) {
            return Err(RegistryError::forbidden(
                "entitlement management requires CatalogManager",
            ));
        }
        let record = self
            .agents
            .get_record(agent_id)
            .await?
            .filter(|r| !r.hidden)
            .ok_or(RegistryError::NotFound)?;
        if record.tenant_id != principal.tenant {
            // Cross-tenant existence never leaks.
            return Err(RegistryError::NotFound);
        }
        Ok(())
    }

    async fn invalidate(&self, tenant: &crate::types::TenantId) {
        self.cache.del_pattern(&tenant_pattern(tenant)).await;
    }
}
