//! Resource Pool Ledger
//!
//! Pool, zone and tag assignment of pods and machines. Every entity always
//! has a pool and a zone: the defaults are never deleted, a pool that still
//! holds entities cannot be deleted, and deleting a zone moves what it held
//! into the default zone.

use crate::error::{Error, Result};
use crate::model::{BmcId, NodeId, PoolId, ResourcePool, Zone, ZoneId};
use crate::store::Tables;
use tracing::info;

/// Pool named `name`, or the default pool when `None`
pub fn resolve_pool(tables: &Tables, name: Option<&str>) -> Result<PoolId> {
    match name {
        None => Ok(tables.default_pool_id()),
        Some(name) => tables
            .pool_by_name(name)
            .map(|pool| pool.id)
            .ok_or_else(|| {
                Error::field(
                    "pool",
                    format!("Resource pool \"{}\" does not exist.", name),
                )
            }),
    }
}

/// Zone named `name`, or the default zone when `None`
pub fn resolve_zone(tables: &Tables, name: Option<&str>) -> Result<ZoneId> {
    match name {
        None => Ok(tables.default_zone_id()),
        Some(name) => tables
            .zone_by_name(name)
            .map(|zone| zone.id)
            .ok_or_else(|| Error::field("zone", format!("Zone \"{}\" does not exist.", name))),
    }
}

// =============================================================================
// Assignment
// =============================================================================

pub fn assign_pod_pool(tables: &mut Tables, pod: BmcId, pool: PoolId) -> Result<()> {
    tables.pool(pool)?;
    tables.pod_mut(pod)?.set_pool(pool);
    Ok(())
}

pub fn assign_pod_zone(tables: &mut Tables, pod: BmcId, zone: ZoneId) -> Result<()> {
    tables.zone(zone)?;
    tables.pod_mut(pod)?.set_zone(zone);
    Ok(())
}

pub fn assign_machine_pool(tables: &mut Tables, node: NodeId, pool: PoolId) -> Result<()> {
    tables.pool(pool)?;
    tables.machine_mut(node)?.pool_id = Some(pool);
    Ok(())
}

pub fn assign_machine_zone(tables: &mut Tables, node: NodeId, zone: ZoneId) -> Result<()> {
    tables.zone(zone)?;
    tables.machine_mut(node)?.zone_id = Some(zone);
    Ok(())
}

/// Make the machine's tags exactly `tags`
pub fn set_machine_tags<I, S>(tables: &mut Tables, node: NodeId, tags: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let machine = tables.machine_mut(node)?;
    machine.tags = tags.into_iter().map(Into::into).collect();
    Ok(())
}

pub fn add_machine_tag(tables: &mut Tables, node: NodeId, tag: &str) -> Result<()> {
    tables.machine_mut(node)?.tags.insert(tag.to_string());
    Ok(())
}

pub fn remove_machine_tag(tables: &mut Tables, node: NodeId, tag: &str) -> Result<()> {
    tables.machine_mut(node)?.tags.remove(tag);
    Ok(())
}

// =============================================================================
// Pool and Zone Lifecycle
// =============================================================================

/// Delete a pool that holds no pods or machines
pub fn delete_pool(tables: &mut Tables, pool: PoolId) -> Result<ResourcePool> {
    let name = tables.pool(pool)?.name.clone();
    let in_use = pool == tables.default_pool_id()
        || tables.pods().any(|pod| pod.pool_id == Some(pool))
        || tables.machines().any(|machine| machine.pool_id == Some(pool));
    if in_use {
        return Err(Error::PoolInUse { pool: name });
    }
    tables.remove_pool(pool)
}

/// Delete a zone, moving its pods and machines to the default zone
pub fn delete_zone(tables: &mut Tables, zone: ZoneId) -> Result<Zone> {
    let default_zone = tables.default_zone_id();
    let name = tables.zone(zone)?.name.clone();
    if zone == default_zone {
        return Err(Error::field(
            "zone",
            format!("Zone \"{}\" is the default zone and cannot be deleted.", name),
        ));
    }

    let pods: Vec<BmcId> = tables
        .pods()
        .filter(|pod| pod.zone_id == Some(zone))
        .map(|pod| pod.id)
        .collect();
    let machines: Vec<NodeId> = tables
        .machines()
        .filter(|machine| machine.zone_id == Some(zone))
        .map(|machine| machine.id)
        .collect();
    for pod in &pods {
        assign_pod_zone(tables, *pod, default_zone)?;
    }
    for node in &machines {
        assign_machine_zone(tables, *node, default_zone)?;
    }
    info!(
        "Deleting zone {}: moved {} pods and {} machines to the default zone",
        name,
        pods.len(),
        machines.len()
    );
    tables.remove_zone(zone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::PowerParameters;
    use crate::model::{Bmc, Machine};

    fn seed() -> (Tables, BmcId, NodeId) {
        let mut tables = Tables::default();
        let pod_id = tables.new_bmc_id();
        let pod = Bmc::new_pod(
            pod_id,
            "pod",
            "virsh",
            PowerParameters::new(),
            None,
            tables.default_pool_id(),
            tables.default_zone_id(),
        );
        tables.upsert_bmc(pod).unwrap();
        let node = tables.new_node_id();
        let mut machine = Machine::new(node, "node-a", "amd64/generic");
        machine.bmc_id = Some(pod_id);
        machine.pool_id = Some(tables.default_pool_id());
        machine.zone_id = Some(tables.default_zone_id());
        tables.insert_machine(machine).unwrap();
        (tables, pod_id, node)
    }

    #[test]
    fn test_pool_in_use_cannot_be_deleted() {
        let (mut tables, _pod, node) = seed();
        let pool = tables.insert_pool("gpu", "").unwrap();
        assign_machine_pool(&mut tables, node, pool).unwrap();

        assert!(matches!(
            delete_pool(&mut tables, pool),
            Err(Error::PoolInUse { .. })
        ));
        let default_pool = tables.default_pool_id();
        assign_machine_pool(&mut tables, node, default_pool).unwrap();
        delete_pool(&mut tables, pool).unwrap();
        assert!(delete_pool(&mut tables, default_pool).is_err());
    }

    #[test]
    fn test_delete_zone_moves_entities_to_default() {
        let (mut tables, pod, node) = seed();
        let zone = tables.insert_zone("rack-b", "").unwrap();
        assign_pod_zone(&mut tables, pod, zone).unwrap();
        assign_machine_zone(&mut tables, node, zone).unwrap();

        delete_zone(&mut tables, zone).unwrap();
        assert_eq!(tables.pod(pod).unwrap().zone_id, Some(tables.default_zone_id()));
        assert_eq!(
            tables.machine(node).unwrap().zone_id,
            Some(tables.default_zone_id())
        );
    }

    #[test]
    fn test_resolve_unknown_pool() {
        let (tables, _, _) = seed();
        assert_eq!(resolve_pool(&tables, None).unwrap(), tables.default_pool_id());
        assert!(resolve_pool(&tables, Some("missing")).is_err());
    }

    #[test]
    fn test_machine_tags() {
        let (mut tables, _, node) = seed();
        set_machine_tags(&mut tables, node, ["b", "a"]).unwrap();
        add_machine_tag(&mut tables, node, "c").unwrap();
        remove_machine_tag(&mut tables, node, "a").unwrap();
        let tags: Vec<_> = tables.machine(node).unwrap().tags.iter().cloned().collect();
        assert_eq!(tags, vec!["b".to_string(), "c".to_string()]);
    }
}
