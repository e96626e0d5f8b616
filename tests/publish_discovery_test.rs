//! End-to-end scenarios for the publish–index–discover loop: publish and
//! discover, idempotent republish, cross-tenant privacy, versioning, and the
//! pagination boundary behaviors.

mod common;

use std::time::Duration;

use canopy::card::content_hash;
use canopy::discovery::SearchParams;
use canopy::error::RegistryError;
use canopy::publish::PublishInput;
use canopy::types::EntitlementSubject;

use common::card;
use common::principal_for;
use common::test_state;
use common::TOKEN_MANAGER_A;
use common::TOKEN_USER_A;
use common::TOKEN_USER_B;

/// Publish, then find the agent on every discovery surface, and verify the
/// served card bytes hash back to the publish-time content hash.
#[tokio::test]
async fn test_publish_and_discover() {
    let (state, _clock) = test_state();
    let manager = principal_for(&state, TOKEN_MANAGER_A).await;

    let body = card("recipe-agent", "1.0.0");
    let expected_hash = content_hash(&body);
    let outcome = state
        .publish
        .publish(
            &state.ctx(),
            &manager,
            PublishInput::ByValue(body),
            true,
            None,
        )
        .await
        .unwrap();
    assert!(outcome.created);

    // Public list, anonymously.
    let listed = state.discovery.list_public(&state.ctx(), 0, None).await.unwrap();
    assert_eq!(listed.items.len(), 1);
    assert_eq!(listed.items[0].name, "recipe-agent");
    assert_eq!(listed.items[0].publisher, "manager-a");

    // Well-known index advertises the id and hash.
    let index = state
        .discovery
        .well_known_index(&state.ctx(), None, None)
        .await
        .unwrap();
    assert_eq!(index.items.len(), 1);
    assert_eq!(index.items[0].id, outcome.agent_id);
    assert_eq!(index.items[0].content_hash, expected_hash);

    // Search catches up within the staleness budget.
    let mut found = false;
    for _ in 0..20 {
        let results = state
            .discovery
            .search(
                &state.ctx(),
                &manager,
                SearchParams {
                    q: Some("recipe".to_string()),
                    ..SearchParams::default()
                },
            )
            .await
            .unwrap();
        if results.total == 1 {
            found = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(found, "search did not reflect the publish in time");

    // Card bytes round-trip to the same hash.
    let served = state
        .discovery
        .get_card(&state.ctx(), None, outcome.agent_id)
        .await
        .unwrap();
    assert_eq!(served.content_hash, expected_hash);
    let reparsed: serde_json::Value = serde_json::from_str(&served.canonical).unwrap();
    assert_eq!(content_hash(&reparsed), expected_hash);

    state.stop().await;
}

/// Publishing identical bytes twice returns the same ids with
/// `created=false` and leaves listings untouched.
#[tokio::test]
async fn test_idempotent_republish() {
    let (state, _clock) = test_state();
    let manager = principal_for(&state, TOKEN_MANAGER_A).await;
    let body = card("recipe-agent", "1.0.0");

    let first = state
        .publish
        .publish(
            &state.ctx(),
            &manager,
            PublishInput::ByValue(body.clone()),
            true,
            None,
        )
        .await
        .unwrap();
    let before = state
        .discovery
        .list_entitled(&state.ctx(), &manager, 0, None)
        .await
        .unwrap();

    let second = state
        .publish
        .publish(
            &state.ctx(),
            &manager,
            PublishInput::ByValue(body),
            true,
            None,
        )
        .await
        .unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.agent_id, second.agent_id);
    assert_eq!(first.version_id, second.version_id);

    let after = state
        .discovery
        .list_entitled(&state.ctx(), &manager, 0, None)
        .await
        .unwrap();
    assert_eq!(before.items.len(), after.items.len());
    assert_eq!(
        before.items[0].updated_at, after.items[0].updated_at,
        "dedupe must not bump updated_at"
    );

    state.stop().await;
}

/// Non-public agents are NotFound for other tenants and for unentitled
/// same-tenant readers; a grant makes them visible.
#[tokio::test]
async fn test_cross_tenant_privacy() {
    let (state, _clock) = test_state();
    let manager = principal_for(&state, TOKEN_MANAGER_A).await;
    let user_a = principal_for(&state, TOKEN_USER_A).await;
    let user_b = principal_for(&state, TOKEN_USER_B).await;

    let outcome = state
        .publish
        .publish(
            &state.ctx(),
            &manager,
            PublishInput::ByValue(card("private-agent", "1.0.0")),
            false,
            None,
        )
        .await
        .unwrap();

    // Another tenant: invisible.
    let err = state
        .discovery
        .get_agent(&state.ctx(), Some(&user_b), outcome.agent_id)
        .await;
    assert!(matches!(err, Err(RegistryError::NotFound)));

    // Same tenant, no entitlement: still invisible.
    let err = state
        .discovery
        .get_agent(&state.ctx(), Some(&user_a), outcome.agent_id)
        .await;
    assert!(matches!(err, Err(RegistryError::NotFound)));

    // Anonymous: invisible.
    let err = state
        .discovery
        .get_agent(&state.ctx(), None, outcome.agent_id)
        .await;
    assert!(matches!(err, Err(RegistryError::NotFound)));

    // Grant to the tenant-a user: visible, with the card.
    state
        .entitlements
        .grant(
            &state.ctx(),
            &manager,
            EntitlementSubject::Principal("user-a".to_string()),
            outcome.agent_id,
        )
        .await
        .unwrap();
    let detail = state
        .discovery
        .get_agent(&state.ctx(), Some(&user_a), outcome.agent_id)
        .await
        .unwrap();
    assert_eq!(detail.summary.name, "private-agent");
    assert_eq!(detail.card["name"], "private-agent");

    // The other tenant stays blind even after the grant.
    let err = state
        .discovery
        .get_agent(&state.ctx(), Some(&user_b), outcome.agent_id)
        .await;
    assert!(matches!(err, Err(RegistryError::NotFound)));

    state.stop().await;
}

/// Two versions of the same agent: the head moves, both versions stay
/// retrievable, and search keys one result by agent id.
#[tokio::test]
async fn test_versioning() {
    let (state, clock) = test_state();
    let manager = principal_for(&state, TOKEN_MANAGER_A).await;

    let v1 = state
        .publish
        .publish(
            &state.ctx(),
            &manager,
            PublishInput::ByValue(card("agent-x", "1.0.0")),
            true,
            None,
        )
        .await
        .unwrap();
    clock.advance(chrono::Duration::seconds(10));
    let v2 = state
        .publish
        .publish(
            &state.ctx(),
            &manager,
            PublishInput::ByValue(card("agent-x", "1.1.0")),
            true,
            None,
        )
        .await
        .unwrap();

    assert_eq!(v1.agent_id, v2.agent_id);
    assert_ne!(v1.version_id, v2.version_id);

    let latest = state.agents.get_latest(v1.agent_id).await.unwrap().unwrap();
    assert_eq!(latest.version, "1.1.0");

    let versions = state.agents.list_versions(v1.agent_id).await.unwrap();
    assert_eq!(versions.len(), 2);
    assert!(state
        .agents
        .get_version(v1.version_id)
        .await
        .unwrap()
        .is_some());

    // Search shows exactly one result for the agent.
    let mut total = 0;
    for _ in 0..20 {
        let results = state
            .discovery
            .search(
                &state.ctx(),
                &manager,
                SearchParams {
                    q: Some("agent-x".to_string()),
                    ..SearchParams::default()
                },
            )
            .await
            .unwrap();
        total = results.total;
        if total == 1 && results.items[0].version == "1.1.0" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(total, 1);

    state.stop().await;
}

/// Tenant cache entries do not survive a publish (property 5).
#[tokio::test]
async fn test_publish_invalidates_tenant_cache() {
    let (state, _clock) = test_state();
    let manager = principal_for(&state, TOKEN_MANAGER_A).await;

    state
        .publish
        .publish(
            &state.ctx(),
            &manager,
            PublishInput::ByValue(card("first-agent", "1.0.0")),
            true,
            None,
        )
        .await
        .unwrap();

    // Prime the entitled-list cache.
    let before = state
        .discovery
        .list_entitled(&state.ctx(), &manager, 0, None)
        .await
        .unwrap();
    assert_eq!(before.items.len(), 1);

    // A second publish must invalidate it: the next read sees both agents
    // even though the cache TTL has not expired.
    state
        .publish
        .publish(
            &state.ctx(),
            &manager,
            PublishInput::ByValue(card("second-agent", "1.0.0")),
            true,
            None,
        )
        .await
        .unwrap();
    let after = state
        .discovery
        .list_entitled(&state.ctx(), &manager, 0, None)
        .await
        .unwrap();
    assert_eq!(after.items.len(), 2);

    state.stop().await;
}

/// Pagination boundaries: `top=0` is an empty well-formed page, `top=101`
/// clamps to 100, and offset paging walks the whole set.
#[tokio::test]
async fn test_pagination_boundaries() {
    let (state, clock) = test_state();
    let manager = principal_for(&state, TOKEN_MANAGER_A).await;

    for i in 0..5 {
        state
            .publish
            .publish(
                &state.ctx(),
                &manager,
                PublishInput::ByValue(card(&format!("agent-{i}"), "1.0.0")),
                true,
                None,
            )
            .await
            .unwrap();
        clock.advance(chrono::Duration::seconds(1));
    }

    let empty = state
        .discovery
        .list_public(&state.ctx(), 0, Some(0))
        .await
        .unwrap();
    assert!(empty.items.is_empty());
    assert_eq!(empty.next_skip, Some(0));

    let clamped = state
        .discovery
        .list_public(&state.ctx(), 0, Some(101))
        .await
        .unwrap();
    assert_eq!(clamped.items.len(), 5);
    assert_eq!(clamped.next_skip, None);

    let page1 = state
        .discovery
        .list_public(&state.ctx(), 0, Some(2))
        .await
        .unwrap();
    assert_eq!(page1.items.len(), 2);
    assert_eq!(page1.items[0].name, "agent-4");
    assert_eq!(page1.next_skip, Some(2));
    let page2 = state
        .discovery
        .list_public(&state.ctx(), 2, Some(2))
        .await
        .unwrap();
    assert_eq!(page2.items[0].name, "agent-2");
    let page3 = state
        .discovery
        .list_public(&state.ctx(), 4, Some(2))
        .await
        .unwrap();
    assert_eq!(page3.items.len(), 1);
    assert_eq!(page3.next_skip, None);

    state.stop().await;
}

/// A declared provider organization must match the publisher unless the
/// caller is an Administrator.
#[tokio::test]
async fn test_provider_mismatch_is_forbidden() {
    let (state, _clock) = test_state();
    let manager = principal_for(&state, TOKEN_MANAGER_A).await;

    let mut body = card("branded-agent", "1.0.0");
    body["provider"] = serde_json::json!({"organization": "Somebody Else"});
    let err = state
        .publish
        .publish(
            &state.ctx(),
            &manager,
            PublishInput::ByValue(body),
            true,
            None,
        )
        .await;
    assert!(matches!(err, Err(RegistryError::Forbidden { .. })));

    state.stop().await;
}

/// Plain users cannot publish at all.
#[tokio::test]
async fn test_publish_requires_catalog_manager() {
    let (state, _clock) = test_state();
    let user = principal_for(&state, TOKEN_USER_A).await;

    let err = state
        .publish
        .publish(
            &state.ctx(),
            &user,
            PublishInput::ByValue(card("nope", "1.0.0")),
            true,
            None,
        )
        .await;
    assert!(matches!(err, Err(RegistryError::Forbidden { .. })));

    state.stop().await;
}

/// A saturated index queue makes publish fail with `Overloaded` and roll
/// the stored version back: publish is atomic.
#[tokio::test]
async fn test_backpressure_rolls_publish_back() {
    use canopy::cache::MemoryCache;
    use canopy::card::CardFetcher;
    use canopy::clock::SystemClock;
    use canopy::index::IndexWriter;
    use canopy::index::MemoryIndex;
    use canopy::index::MemoryRepairLog;
    use canopy::index::WriterConfig;
    use canopy::publish::PublishConfig;
    use canopy::publish::PublishService;
    use canopy::store::AgentStore;
    use canopy::store::MemoryAgentStore;
    use canopy::types::Principal;
    use std::sync::Arc;

    let clock = Arc::new(SystemClock);
    let agents: Arc<MemoryAgentStore> = Arc::new(MemoryAgentStore::new(clock));
    // One slot, workers never started: the second enqueue must time out.
    let writer = Arc::new(IndexWriter::new(
        Arc::new(MemoryIndex::new()),
        Arc::new(MemoryRepairLog::new()),
        WriterConfig {
            shards: 1,
            queue_depth: 1,
            enqueue_timeout: Duration::from_millis(20),
            repair_interval: Duration::from_secs(60),
        },
    ));
    let publish = PublishService::new(
        Arc::new(CardFetcher::new().unwrap()),
        agents.clone(),
        writer,
        Arc::new(MemoryCache::new()),
        PublishConfig::default(),
    );
    let manager = Principal {
        id: "manager-a".to_string(),
        tenant: canopy::types::TenantId::new("tenant-a"),
        kind: canopy::types::PrincipalKind::User,
        roles: [canopy::types::Role::CatalogManager].into_iter().collect(),
        scopes: Default::default(),
        consumer_id: None,
    };
    let ctx = canopy::context::RequestContext::with_budget(Duration::from_secs(5));

    let first = publish
        .publish(
            &ctx,
            &manager,
            PublishInput::ByValue(card("fits", "1.0.0")),
            true,
            None,
        )
        .await
        .unwrap();
    assert!(first.created);

    let err = publish
        .publish(
            &ctx,
            &manager,
            PublishInput::ByValue(card("overflow", "1.0.0")),
            true,
            None,
        )
        .await;
    assert!(matches!(err, Err(RegistryError::Overloaded { .. })));

    // The overflowing version was rolled back entirely.
    let page = agents.list_public(None, 10).await.unwrap();
    let names: Vec<&str> = page.items.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["fits"]);
}

/// Grant → revoke → grant leaves the entitlement active with a later
/// `granted_at`.
#[tokio::test]
async fn test_grant_revoke_grant_round_trip() {
    let (state, clock) = test_state();
    let manager = principal_for(&state, TOKEN_MANAGER_A).await;
    let user_a = principal_for(&state, TOKEN_USER_A).await;

    let outcome = state
        .publish
        .publish(
            &state.ctx(),
            &manager,
            PublishInput::ByValue(card("gated-agent", "1.0.0")),
            false,
            None,
        )
        .await
        .unwrap();
    let subject = EntitlementSubject::Principal("user-a".to_string());

    let first = state
        .entitlements
        .grant(&state.ctx(), &manager, subject.clone(), outcome.agent_id)
        .await
        .unwrap();
    clock.advance(chrono::Duration::seconds(5));
    assert!(state
        .entitlements
        .revoke(&state.ctx(), &manager, &subject, outcome.agent_id)
        .await
        .unwrap());
    assert!(matches!(
        state
            .discovery
            .get_agent(&state.ctx(), Some(&user_a), outcome.agent_id)
            .await,
        Err(RegistryError::NotFound)
    ));

    clock.advance(chrono::Duration::seconds(5));
    let second = state
        .entitlements
        .grant(&state.ctx(), &manager, subject, outcome.agent_id)
        .await
        .unwrap();
    assert!(second.granted_at > first.granted_at);
    assert!(state
        .discovery
        .get_agent(&state.ctx(), Some(&user_a), outcome.agent_id)
        .await
        .is_ok());

    state.stop().await;
}
