//! redb table definitions for the inventory cache.
//!
//! Record tables use `&str` keys and `&[u8]` values (JSON-serialized).

use redb::TableDefinition;

/// Cached DUT records keyed by DUT id.
pub const DUTS_BY_ID: TableDefinition<&str, &[u8]> = TableDefinition::new("duts_by_id");

/// Secondary index: DUT hostname → DUT id.
pub const DUT_ID_BY_HOSTNAME: TableDefinition<&str, &str> = TableDefinition::new("dut_id_by_hostname");

/// Drone configurations keyed by drone hostname.
pub const DRONE_CONFIGS: TableDefinition<&str, &[u8]> = TableDefinition::new("drone_configs");

/// DUTs that no drone owns, keyed by DUT id.
pub const FREE_DUTS: TableDefinition<&str, &[u8]> = TableDefinition::new("free_duts");

/// Deployment attempts keyed by deployment id.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");
