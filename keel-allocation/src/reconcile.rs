//! Derives new index metadata from a routing change.
//!
//! Two bookkeeping duties follow every committed pass: the in-sync
//! allocation id sets must track the started copies, and primary terms must
//! advance exactly when a different incarnation took over as primary.

use std::collections::BTreeSet;
use std::sync::Arc;

use keel_cluster::{MetaData, RoutingTable, ShardRouting};
use uuid::Uuid;

use crate::error::{AllocationError, AllocationResult};

/// Reconciles metadata with a new routing table.
///
/// Returns the original `Arc` untouched when nothing changed, so callers can
/// short-circuit on identity.
///
/// # Errors
/// Returns [`AllocationError::InvariantViolation`] if the new table
/// references an index without metadata or a shard without a primary entry:
/// both are programming errors upstream.
pub fn reconcile_metadata(
    old: &Arc<MetaData>,
    old_table: &RoutingTable,
    new_table: &RoutingTable,
) -> AllocationResult<Arc<MetaData>> {
    let mut updated: Option<MetaData> = None;

    for index_table in new_table.iter() {
        let index_name = index_table.index().name();
        let Some(old_meta) = old.index(index_name) else {
            return Err(AllocationError::InvariantViolation {
                detail: format!("no metadata for routed index [{index_name}]"),
            });
        };

        for shard_table in index_table.iter() {
            let shard_id = shard_table.shard_id();
            let number = shard_id.number();

            // In-sync allocation ids follow the started copies; a relocating
            // source is mid-handoff and rejoins the set through its target
            // when that target starts. An empty set is never written back:
            // when every copy is transiently gone the last known good set
            // must survive.
            let active: BTreeSet<Uuid> = shard_table
                .iter()
                .filter(|s| s.is_started())
                .filter_map(|s| s.allocation_id().map(|a| a.id()))
                .collect();
            if !active.is_empty() && active != *old_meta.in_sync_ids(number) {
                let metadata = updated.get_or_insert_with(|| (**old).clone());
                let Some(meta) = metadata.index(index_name).cloned() else {
                    unreachable!("index checked above")
                };
                let mut meta = meta;
                meta.set_in_sync_ids(number, active);
                metadata.put_index(meta);
            }

            // Primary terms advance on promotion or fresh assignment, never
            // on a completed relocation of the same incarnation.
            let Some(new_primary) = shard_table.primary() else {
                return Err(AllocationError::InvariantViolation {
                    detail: format!("{shard_id}: no primary entry in new routing table"),
                });
            };
            let Some(old_primary) = old_table
                .shard_table(shard_id)
                .and_then(keel_cluster::ShardTable::primary)
            else {
                return Err(AllocationError::InvariantViolation {
                    detail: format!("{shard_id}: no primary entry in old routing table"),
                });
            };

            if !primary_term_unchanged(old_primary, new_primary) {
                let metadata = updated.get_or_insert_with(|| (**old).clone());
                let Some(meta) = metadata.index(index_name).cloned() else {
                    unreachable!("index checked above")
                };
                let mut meta = meta;
                let term = meta.primary_term(number) + 1;
                meta.set_primary_term(number, term);
                metadata.put_index(meta);
                tracing::debug!(shard = %shard_id, term, "primary term advanced");
            }
        }
    }

    Ok(updated.map_or_else(|| Arc::clone(old), Arc::new))
}

fn primary_term_unchanged(old_primary: &ShardRouting, new_primary: &ShardRouting) -> bool {
    if new_primary.is_unassigned() {
        // No one took over; the term advances when someone does.
        return true;
    }
    if new_primary.is_same_allocation(old_primary) {
        return true;
    }
    // A completed primary relocation: the new primary is the old primary's
    // relocation target, activated. Same reign, same term.
    old_primary.is_relocating()
        && old_primary
            .allocation_id()
            .and_then(|a| a.relocation_id())
            .is_some_and(|target_id| {
                new_primary
                    .allocation_id()
                    .is_some_and(|a| a.id() == target_id)
            })
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_cluster::{
        AllocationClock, Index, IndexMetaData, IndexSettings, RoutingTable, ShardId, ShardTable,
        UnassignedInfo, UnassignedReason,
    };
    use keel_core::{NodeId, ShardNumber};

    fn index() -> Index {
        Index::new("logs", Uuid::from_u128(1))
    }

    fn shard_id() -> ShardId {
        ShardId::new(index(), ShardNumber::new(0))
    }

    fn metadata() -> Arc<MetaData> {
        Arc::new(MetaData::new().with_index(IndexMetaData::new(
            index(),
            1,
            0,
            IndexSettings::new(),
        )))
    }

    fn unassigned_primary() -> ShardRouting {
        ShardRouting::new_unassigned(
            shard_id(),
            true,
            UnassignedInfo::new(
                UnassignedReason::IndexCreated,
                None,
                AllocationClock::default(),
            ),
        )
    }

    fn table_of(primary: ShardRouting) -> RoutingTable {
        RoutingTable::builder(1)
            .add_shard_table(ShardTable::new(shard_id(), vec![primary]))
            .build()
    }

    #[test]
    fn test_unchanged_metadata_keeps_identity() {
        let old = metadata();
        let table = table_of(unassigned_primary());
        let new = reconcile_metadata(&old, &table, &table).unwrap();
        assert!(Arc::ptr_eq(&old, &new));
    }

    #[test]
    fn test_fresh_assignment_bumps_term_and_skips_in_sync() {
        let old = metadata();
        let old_table = table_of(unassigned_primary());

        let mut primary = unassigned_primary();
        primary.initialize(NodeId::new(1), Uuid::from_u128(10), None);
        let new_table = table_of(primary);

        let new = reconcile_metadata(&old, &old_table, &new_table).unwrap();
        let meta = new.index("logs").unwrap();
        // Initializing is not active yet: no in-sync entry, but a new reign.
        assert!(meta.in_sync_ids(ShardNumber::new(0)).is_empty());
        assert_eq!(meta.primary_term(ShardNumber::new(0)), 1);
    }

    #[test]
    fn test_started_primary_recorded_in_sync() {
        let old = metadata();

        let mut initializing = unassigned_primary();
        initializing.initialize(NodeId::new(1), Uuid::from_u128(10), None);
        let old_table = table_of(initializing.clone());

        let mut started = initializing;
        started.move_to_started();
        let new_table = table_of(started);

        let new = reconcile_metadata(&old, &old_table, &new_table).unwrap();
        let meta = new.index("logs").unwrap();
        let in_sync = meta.in_sync_ids(ShardNumber::new(0));
        assert_eq!(in_sync.len(), 1);
        assert!(in_sync.contains(&Uuid::from_u128(10)));
        // Same incarnation started: no additional term bump.
        assert_eq!(meta.primary_term(ShardNumber::new(0)), 0);
    }

    #[test]
    fn test_completed_relocation_keeps_term() {
        let old = metadata();

        let mut source = unassigned_primary();
        source.initialize(NodeId::new(1), Uuid::from_u128(10), None);
        source.move_to_started();
        let mut relocating = source.clone();
        let target = relocating.begin_relocation(NodeId::new(2), Uuid::from_u128(20), None);
        let old_table = table_of(relocating);

        let mut arrived = target;
        arrived.move_to_started();
        let new_table = table_of(arrived);

        let new = reconcile_metadata(&old, &old_table, &new_table).unwrap();
        let meta = new.index("logs").unwrap();
        assert_eq!(meta.primary_term(ShardNumber::new(0)), 0);
        // The in-sync set now names the target incarnation.
        assert!(meta
            .in_sync_ids(ShardNumber::new(0))
            .contains(&Uuid::from_u128(20)));
    }

    #[test]
    fn test_empty_active_set_retained() {
        let mut base = (*metadata()).clone();
        let mut meta = base.index("logs").unwrap().clone();
        meta.set_in_sync_ids(
            ShardNumber::new(0),
            [Uuid::from_u128(10)].into_iter().collect(),
        );
        base.put_index(meta);
        let old = Arc::new(base);

        // Every copy gone: unassigned primary in both tables.
        let table = table_of(unassigned_primary());
        let new = reconcile_metadata(&old, &table, &table).unwrap();
        assert!(Arc::ptr_eq(&old, &new));
        assert!(new
            .index("logs")
            .unwrap()
            .in_sync_ids(ShardNumber::new(0))
            .contains(&Uuid::from_u128(10)));
    }

    #[test]
    fn test_missing_metadata_fails_fast() {
        let old = Arc::new(MetaData::new());
        let table = table_of(unassigned_primary());
        let err = reconcile_metadata(&old, &table, &table).unwrap_err();
        assert!(matches!(err, AllocationError::InvariantViolation { .. }));
    }
}
