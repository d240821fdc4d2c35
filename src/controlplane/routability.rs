//! BMC Routability
//!
//! Which rack controllers can reach a BMC: directly on a shared subnet
//! (layer 2), or through a route recorded by the last discovery.

use crate::error::Result;
use crate::model::BmcId;
use crate::store::Tables;
use std::collections::BTreeSet;
use tracing::debug;

/// Restricts rack lookups to racks with a live connection
#[derive(Debug, Clone, Copy)]
pub enum ConnectionFilter<'a> {
    /// Only racks whose system ID is listed
    Connected(&'a [String]),
    /// Every known rack
    Any,
}

impl ConnectionFilter<'_> {
    fn allows(&self, system_id: &str) -> bool {
        match self {
            ConnectionFilter::Connected(idents) => idents.iter().any(|ident| ident == system_id),
            ConnectionFilter::Any => true,
        }
    }
}

/// Racks sharing a subnet with the BMC's address
pub fn layer2_usable_racks(
    tables: &Tables,
    bmc: BmcId,
    filter: ConnectionFilter<'_>,
) -> Result<Vec<String>> {
    let Some(ip) = tables.bmc(bmc)?.ip_address else {
        return Ok(Vec::new());
    };
    Ok(tables
        .racks()
        .filter(|rack| rack.on_same_subnet(ip) && filter.allows(&rack.system_id))
        .map(|rack| rack.system_id.clone())
        .collect())
}

/// Racks that reached the BMC at the last discovery
pub fn routable_usable_racks(
    tables: &Tables,
    bmc: BmcId,
    filter: ConnectionFilter<'_>,
) -> Result<Vec<String>> {
    tables.bmc(bmc)?;
    Ok(tables
        .routability_of(bmc)
        .filter(|row| row.routable && filter.allows(&row.rack_id))
        .map(|row| row.rack_id.clone())
        .collect())
}

/// Layer-2 racks, or the routable ones when no rack shares a subnet
pub fn usable_racks(
    tables: &Tables,
    bmc: BmcId,
    filter: ConnectionFilter<'_>,
) -> Result<Vec<String>> {
    let racks = layer2_usable_racks(tables, bmc, filter)?;
    if !racks.is_empty() {
        return Ok(racks);
    }
    routable_usable_racks(tables, bmc, filter)
}

/// System IDs to resolve an RPC client for the BMC with
pub fn client_identifiers(
    tables: &Tables,
    bmc: BmcId,
    connected: &[String],
) -> Result<Vec<String>> {
    usable_racks(tables, bmc, ConnectionFilter::Connected(connected))
}

/// Whether any rack, connected or not, can reach the BMC
pub fn is_accessible(tables: &Tables, bmc: BmcId) -> Result<bool> {
    Ok(!usable_racks(tables, bmc, ConnectionFilter::Any)?.is_empty())
}

/// Replace the routability rows of `bmc`. Racks unknown to the store are
/// skipped.
pub fn update_routable_racks(
    tables: &mut Tables,
    bmc: BmcId,
    routable: &[String],
    non_routable: &[String],
) -> Result<()> {
    tables.bmc(bmc)?;
    let known: BTreeSet<String> = tables.racks().map(|rack| rack.system_id.clone()).collect();
    let keep = |ids: &[String]| -> Vec<String> {
        ids.iter()
            .filter(|id| {
                let exists = known.contains(id.as_str());
                if !exists {
                    debug!("Skipping routability of unknown rack controller {}", id);
                }
                exists
            })
            .cloned()
            .collect()
    };
    let routable = keep(routable);
    let non_routable = keep(non_routable);
    tables.replace_routability(bmc, &routable, &non_routable);
    Ok(())
}
