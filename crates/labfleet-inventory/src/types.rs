//! Domain types for the lab inventory.
//!
//! These mirror the records stored in the config repository: one `Lab`
//! file with every DUT and one `Infrastructure` file with every server.
//! All types serialize to/from JSON through [`crate::codec`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InventoryError;

/// Unique identifier for a DUT within a Lab snapshot.
pub type DutId = String;

// ── Environment ───────────────────────────────────────────────────

/// Deployment stage partitioning drones and DUTs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum Environment {
    #[default]
    #[serde(rename = "ENVIRONMENT_INVALID")]
    Invalid,
    #[serde(rename = "ENVIRONMENT_PROD")]
    Prod,
    #[serde(rename = "ENVIRONMENT_STAGING")]
    Staging,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Invalid => "ENVIRONMENT_INVALID",
            Environment::Prod => "ENVIRONMENT_PROD",
            Environment::Staging => "ENVIRONMENT_STAGING",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = InventoryError;

    /// Accepts both `ENVIRONMENT_PROD` and `prod`, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let short = upper.strip_prefix("ENVIRONMENT_").unwrap_or(&upper);
        match short {
            "PROD" => Ok(Environment::Prod),
            "STAGING" => Ok(Environment::Staging),
            _ => Err(InventoryError::UnknownEnvironment(s.to_string())),
        }
    }
}

// ── Pools ─────────────────────────────────────────────────────────

/// Named pool a DUT can be a member of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DutPool {
    #[serde(rename = "DUT_POOL_CQ")]
    Cq,
    #[serde(rename = "DUT_POOL_BVT")]
    Bvt,
    #[serde(rename = "DUT_POOL_SUITES")]
    Suites,
    #[serde(rename = "DUT_POOL_CTS")]
    Cts,
    #[serde(rename = "DUT_POOL_CTS_PERBUILD")]
    CtsPerbuild,
    #[serde(rename = "DUT_POOL_CONTINUOUS")]
    Continuous,
    #[serde(rename = "DUT_POOL_ARC_PRESUBMIT")]
    ArcPresubmit,
    #[serde(rename = "DUT_POOL_QUOTA")]
    Quota,
}

impl DutPool {
    pub const ALL: [DutPool; 8] = [
        DutPool::Cq,
        DutPool::Bvt,
        DutPool::Suites,
        DutPool::Cts,
        DutPool::CtsPerbuild,
        DutPool::Continuous,
        DutPool::ArcPresubmit,
        DutPool::Quota,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DutPool::Cq => "DUT_POOL_CQ",
            DutPool::Bvt => "DUT_POOL_BVT",
            DutPool::Suites => "DUT_POOL_SUITES",
            DutPool::Cts => "DUT_POOL_CTS",
            DutPool::CtsPerbuild => "DUT_POOL_CTS_PERBUILD",
            DutPool::Continuous => "DUT_POOL_CONTINUOUS",
            DutPool::ArcPresubmit => "DUT_POOL_ARC_PRESUBMIT",
            DutPool::Quota => "DUT_POOL_QUOTA",
        }
    }
}

impl fmt::Display for DutPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DutPool {
    type Err = InventoryError;

    /// Accepts `DUT_POOL_CQ` as well as the short form `cq`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let short = upper.strip_prefix("DUT_POOL_").unwrap_or(&upper);
        DutPool::ALL
            .into_iter()
            .find(|p| &p.as_str()["DUT_POOL_".len()..] == short)
            .ok_or_else(|| InventoryError::UnknownPool(s.to_string()))
    }
}

// ── DUT ───────────────────────────────────────────────────────────

/// Why a DUT was taken out of service.
///
/// Present on a DUT iff it is currently not owned by any drone.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemovalReason {
    #[serde(default)]
    pub bug: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_time: Option<DateTime<Utc>>,
}

/// A device under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dut {
    /// Empty in the specs of a DUT not yet in the fleet.
    #[serde(default)]
    pub id: DutId,
    /// Not guaranteed unique across the Lab.
    pub hostname: String,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub model: String,
    /// Critical pool memberships.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pools: Vec<DutPool>,
    /// Free-form device attributes (servo host, servo port, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removal_reason: Option<RemovalReason>,
}

impl Dut {
    pub fn in_pool(&self, pool: DutPool) -> bool {
        self.pools.contains(&pool)
    }

    /// Replace membership of `old` by `new`, keeping the pool list a set.
    pub fn move_pool(&mut self, old: DutPool, new: DutPool) {
        self.pools.retain(|p| *p != old);
        if !self.pools.contains(&new) {
            self.pools.push(new);
        }
    }
}

// ── Servers ───────────────────────────────────────────────────────

/// Role a server plays in the lab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerRole {
    #[serde(rename = "ROLE_DRONE")]
    Drone,
    #[serde(rename = "ROLE_DEVSERVER")]
    Devserver,
    #[serde(rename = "ROLE_AFE")]
    Afe,
}

/// Operational status of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServerStatus {
    #[default]
    #[serde(rename = "STATUS_PRIMARY")]
    Primary,
    #[serde(rename = "STATUS_BACKUP")]
    Backup,
    #[serde(rename = "STATUS_REPAIR_REQUIRED")]
    RepairRequired,
}

/// A lab server. Drones carry the ordered list of DUTs they operate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub hostname: String,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<ServerRole>,
    #[serde(default)]
    pub status: ServerStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dut_uids: Vec<DutId>,
}

impl Server {
    pub fn is_drone(&self) -> bool {
        self.roles.contains(&ServerRole::Drone)
    }
}

// ── Snapshot halves ───────────────────────────────────────────────

/// Every DUT in the lab, in file order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Lab {
    #[serde(default)]
    pub duts: Vec<Dut>,
}

impl Lab {
    /// Remove every DUT whose hostname is in `hostnames`.
    ///
    /// Several DUTs may share a hostname; all of them are removed.
    /// Unknown hostnames are ignored. Returns the removed DUTs in file order.
    pub fn remove_duts_with_hostnames(&mut self, hostnames: &[String]) -> Vec<Dut> {
        let (removed, kept): (Vec<Dut>, Vec<Dut>) = std::mem::take(&mut self.duts)
            .into_iter()
            .partition(|d| hostnames.iter().any(|h| *h == d.hostname));
        self.duts = kept;
        removed
    }
}

/// Every server in the lab, in file order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Infrastructure {
    #[serde(default)]
    pub servers: Vec<Server>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dut(id: &str, hostname: &str) -> Dut {
        Dut {
            id: id.to_string(),
            hostname: hostname.to_string(),
            environment: Environment::Staging,
            model: "link".to_string(),
            pools: vec![DutPool::Suites],
            attributes: BTreeMap::new(),
            removal_reason: None,
        }
    }

    #[test]
    fn pool_parses_long_and_short_names() {
        assert_eq!("DUT_POOL_CQ".parse::<DutPool>().unwrap(), DutPool::Cq);
        assert_eq!("suites".parse::<DutPool>().unwrap(), DutPool::Suites);
        assert_eq!(
            "cts_perbuild".parse::<DutPool>().unwrap(),
            DutPool::CtsPerbuild
        );
        assert!(matches!(
            "DUT_POOL_NOPE".parse::<DutPool>(),
            Err(InventoryError::UnknownPool(_))
        ));
    }

    #[test]
    fn environment_parses_long_and_short_names() {
        assert_eq!(
            "ENVIRONMENT_STAGING".parse::<Environment>().unwrap(),
            Environment::Staging
        );
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Prod);
        assert!("ENVIRONMENT_INVALID".parse::<Environment>().is_err());
    }

    #[test]
    fn move_pool_keeps_membership_a_set() {
        let mut d = dut("a", "host-a");
        d.pools.push(DutPool::Cq);
        d.move_pool(DutPool::Suites, DutPool::Cq);
        assert_eq!(d.pools, vec![DutPool::Cq]);
    }

    #[test]
    fn remove_by_hostname_removes_all_matches() {
        let mut lab = Lab {
            duts: vec![dut("1", "shared"), dut("2", "other"), dut("3", "shared")],
        };
        let removed = lab.remove_duts_with_hostnames(&["shared".to_string(), "ghost".to_string()]);
        let ids: Vec<_> = removed.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert_eq!(lab.duts.len(), 1);
        assert_eq!(lab.duts[0].id, "2");
    }

    #[test]
    fn drone_role_detection() {
        let server = Server {
            hostname: "drone-1".to_string(),
            environment: Environment::Prod,
            roles: vec![ServerRole::Devserver, ServerRole::Drone],
            status: ServerStatus::Primary,
            dut_uids: vec![],
        };
        assert!(server.is_drone());
    }
}
