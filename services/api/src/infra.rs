use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use qre_review::workflows::review::findings::{
    EntityRef, EntitySnapshot, EntityType, Finding, RuleCatalog,
};
use qre_review::workflows::review::{
    ClientId, MemoryBlobStore, MemoryReviewStore, OrganizationId, OrganizationSettings,
    ReviewBackends, ReviewDesk, ReviewError, ReviewScope,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

pub(crate) const DEMO_ORGANIZATION: &str = "org-demo-cpa";
pub(crate) const DEMO_CLIENT: &str = "cli-orbital";
pub(crate) const DEMO_CLIENT_NAME: &str = "Orbital Instruments Inc.";

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// An in-memory desk plus handles to its stores so callers can seed entity snapshots.
pub(crate) struct InMemoryDesk {
    pub(crate) desk: Arc<ReviewDesk>,
    pub(crate) store: MemoryReviewStore,
    pub(crate) blobs: MemoryBlobStore,
}

pub(crate) fn in_memory_desk(stall_ceiling: Duration) -> InMemoryDesk {
    let store = MemoryReviewStore::new();
    let blobs = MemoryBlobStore::new();
    let directory = qre_review::workflows::review::StaticDirectory::new()
        .with_organization(
            OrganizationId::from(DEMO_ORGANIZATION),
            OrganizationSettings::default(),
        )
        .with_client(
            OrganizationId::from(DEMO_ORGANIZATION),
            ClientId::from(DEMO_CLIENT),
            DEMO_CLIENT_NAME,
        );
    let desk = Arc::new(ReviewDesk::new(
        ReviewBackends::in_memory(&store, &blobs, directory),
        RuleCatalog::standard(),
        stall_ceiling,
    ));
    InMemoryDesk { desk, store, blobs }
}

pub(crate) fn demo_scope(tax_year: i32) -> ReviewScope {
    ReviewScope::new(DEMO_ORGANIZATION, DEMO_CLIENT, tax_year)
}

/// Entity snapshots covering every standard rule.
pub(crate) fn demo_snapshots(scope: &ReviewScope) -> Vec<EntitySnapshot> {
    vec![
        EntitySnapshot::new(EntityRef::new(EntityType::Employee, "emp-ada"), scope)
            .with_field("qualified_wages", 312_000.0)
            .with_field("rd_allocation_pct", 70.0),
        EntitySnapshot::new(EntityRef::new(EntityType::Employee, "emp-lin"), scope)
            .with_field("qualified_wages", 96_000.0)
            .with_field("rd_allocation_pct", 99.0),
        EntitySnapshot::new(EntityRef::new(EntityType::Contractor, "vendor-fabworks"), scope)
            .with_field("amount", 30_000.0)
            .with_field("vendor", "FabWorks Prototyping"),
        EntitySnapshot::new(EntityRef::new(EntityType::Expense, "tx-0931"), scope)
            .with_field("amount", 84_500.0)
            .with_field("vendor", "Cryo Supply Co."),
    ]
}

/// Store the demo snapshots and evaluate them, returning every finding raised.
pub(crate) fn seed_demo_findings(
    seeded: &InMemoryDesk,
    scope: &ReviewScope,
    now: DateTime<Utc>,
) -> Result<Vec<Finding>, ReviewError> {
    let mut findings = Vec::new();
    for snapshot in demo_snapshots(scope) {
        let entity = snapshot.entity.clone();
        seeded.store.put_snapshot(snapshot)?;
        findings.extend(seeded.desk.evaluate_entity(scope, &entity, now)?);
    }
    Ok(findings)
}
