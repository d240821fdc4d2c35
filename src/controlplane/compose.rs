//! Compose Requests
//!
//! Turns a user compose request into the [`RequestedMachine`] sent to a pod
//! driver, applying defaults and checking it against the pod's hints.

use crate::domain::ports::{RequestedBlockDevice, RequestedInterface, RequestedMachine};
use crate::error::{Error, Result};
use crate::ledger;
use crate::model::names::unique_petname;
use crate::model::{is_valid_hostname, PodView, PoolId, ZoneId};
use crate::store::Tables;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const DEFAULT_CORES: u32 = 1;
/// MiB
pub const DEFAULT_MEMORY: u64 = 1024;
pub const MIN_MEMORY: u64 = 1024;
/// MHz
pub const MIN_CPU_SPEED: u32 = 300;
pub const DEFAULT_STORAGE: &str = "root:8";

const GB: f64 = 1_000_000_000.0;

/// What the user asked for; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeRequest {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default)]
    pub cores: Option<u32>,
    /// MiB
    #[serde(default)]
    pub memory: Option<u64>,
    /// MHz
    #[serde(default)]
    pub cpu_speed: Option<u32>,
    /// `label:size_gb(tag,tag),...`
    #[serde(default)]
    pub storage: Option<String>,
    #[serde(default)]
    pub pool: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
}

/// Request checked against one pod
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedCompose {
    pub machine: RequestedMachine,
    pub pool: Option<PoolId>,
    pub zone: Option<ZoneId>,
}

// =============================================================================
// Storage Grammar
// =============================================================================

fn storage_entry_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"^(?P<label>[a-zA-Z0-9_-]+):(?P<size>[0-9]+(?:\.[0-9]+)?)(?:\((?P<tags>[^()]*)\))?$",
            )
            .ok()
        })
        .as_ref()
}

/// Split on commas outside of parentheses
fn split_entries(value: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (idx, ch) in value.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                entries.push(&value[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    entries.push(&value[start..]);
    entries
}

/// Parse `root:8(ssd),extra:20` into block device requests. Sizes are in
/// decimal gigabytes.
pub fn parse_storage(value: &str) -> Result<Vec<RequestedBlockDevice>> {
    let pattern = storage_entry_pattern()
        .ok_or_else(|| Error::Internal("storage pattern failed to compile".into()))?;
    split_entries(value.trim())
        .into_iter()
        .map(|entry| {
            let entry = entry.trim();
            let malformed =
                || Error::field("storage", format!("Malformed storage constraint, \"{}\".", entry));
            let captures = pattern.captures(entry).ok_or_else(malformed)?;
            let size: f64 = captures["size"].parse().map_err(|_| malformed())?;
            if size <= 0.0 {
                return Err(malformed());
            }
            let tags = captures
                .name("tags")
                .map(|tags| {
                    tags.as_str()
                        .split(',')
                        .map(str::trim)
                        .filter(|tag| !tag.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            Ok(RequestedBlockDevice {
                size: (size * GB).round() as u64,
                tags,
            })
        })
        .collect()
}

// =============================================================================
// Validation
// =============================================================================

fn at_least(field: &str, min: impl std::fmt::Display) -> Error {
    Error::field(
        field,
        format!("Ensure this value is greater than or equal to {}.", min),
    )
}

fn at_most(field: &str, max: impl std::fmt::Display) -> Error {
    Error::field(
        field,
        format!("Ensure this value is less than or equal to {}.", max),
    )
}

impl ComposeRequest {
    /// Apply defaults and check the request fits `pod`.
    ///
    /// The hostname is checked first. A missing one is replaced by a random
    /// name not used by any node.
    pub fn validate(&self, tables: &Tables, pod: &PodView<'_>) -> Result<ValidatedCompose> {
        let hostname = match &self.hostname {
            Some(hostname) if tables.hostname_taken(hostname) => {
                return Err(Error::field(
                    "hostname",
                    format!("Node with hostname \"{}\" already exists", hostname),
                ))
            }
            Some(hostname) if !is_valid_hostname(hostname) => {
                return Err(Error::field(
                    "hostname",
                    format!("Invalid hostname \"{}\".", hostname),
                ))
            }
            Some(hostname) => hostname.clone(),
            None => unique_petname(|candidate| tables.hostname_taken(candidate)),
        };

        let architecture = match &self.architecture {
            Some(arch) if pod.architectures.contains(arch) => arch.clone(),
            Some(arch) => {
                return Err(Error::field(
                    "architecture",
                    format!(
                        "Select a valid choice. {} is not one of the available choices.",
                        arch
                    ),
                ))
            }
            None => pod
                .architectures
                .first()
                .cloned()
                .ok_or_else(|| Error::field("architecture", "This field is required."))?,
        };

        let cores = self.cores.unwrap_or(DEFAULT_CORES);
        if cores < 1 {
            return Err(at_least("cores", 1));
        }
        if cores > pod.hints.cores {
            return Err(at_most("cores", pod.hints.cores));
        }

        let memory = self.memory.unwrap_or(DEFAULT_MEMORY);
        if memory < MIN_MEMORY {
            return Err(at_least("memory", MIN_MEMORY));
        }
        if memory > pod.hints.memory {
            return Err(at_most("memory", pod.hints.memory));
        }

        if let Some(cpu_speed) = self.cpu_speed {
            if cpu_speed < MIN_CPU_SPEED {
                return Err(at_least("cpu_speed", MIN_CPU_SPEED));
            }
            if pod.hints.cpu_speed > 0 && cpu_speed > pod.hints.cpu_speed {
                return Err(at_most("cpu_speed", pod.hints.cpu_speed));
            }
        }

        let block_devices = parse_storage(self.storage.as_deref().unwrap_or(DEFAULT_STORAGE))?;

        let pool = self
            .pool
            .as_deref()
            .map(|name| ledger::resolve_pool(tables, Some(name)))
            .transpose()?;
        let zone = self
            .zone
            .as_deref()
            .map(|name| ledger::resolve_zone(tables, Some(name)))
            .transpose()?;

        Ok(ValidatedCompose {
            machine: RequestedMachine {
                hostname,
                architecture,
                cores,
                memory,
                cpu_speed: self.cpu_speed,
                block_devices,
                interfaces: vec![RequestedInterface::default()],
            },
            pool,
            zone,
        })
    }
}
