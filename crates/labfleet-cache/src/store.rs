//! InventoryCache — redb-backed read cache and free-DUT side table.
//!
//! The cache is filled by an explicit sync from a repository snapshot
//! and serves DUT lookups by id or hostname between syncs. The free-DUT
//! table is reconciled against the live snapshot after every mutation.
//!
//! Every replace-style write scans for keys to drop inside its own write
//! transaction. redb serializes writers, so concurrent reconciles apply
//! one after the other and the table always ends up matching one of them.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use labfleet_inventory::Dut;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::{debug, info};

use crate::error::{CacheError, CacheResult};
use crate::tables::*;
use crate::types::*;

macro_rules! map_err {
    ($variant:ident) => {
        |e| CacheError::$variant(e.to_string())
    };
}

/// Counts reported by a sync or reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub written: usize,
    pub removed: usize,
}

/// Thread-safe cache backed by redb.
#[derive(Clone)]
pub struct InventoryCache {
    db: Arc<Database>,
}

impl InventoryCache {
    /// Open (or create) a persistent cache at the given path.
    pub fn open(path: &Path) -> CacheResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let cache = Self { db: Arc::new(db) };
        cache.ensure_tables()?;
        debug!(?path, "inventory cache opened");
        Ok(cache)
    }

    /// Create an ephemeral in-memory cache.
    pub fn open_in_memory() -> CacheResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let cache = Self { db: Arc::new(db) };
        cache.ensure_tables()?;
        debug!("in-memory inventory cache opened");
        Ok(cache)
    }

    fn ensure_tables(&self) -> CacheResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(DUTS_BY_ID).map_err(map_err!(Table))?;
        txn.open_table(DUT_ID_BY_HOSTNAME).map_err(map_err!(Table))?;
        txn.open_table(DRONE_CONFIGS).map_err(map_err!(Table))?;
        txn.open_table(FREE_DUTS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── DUT records ────────────────────────────────────────────────

    /// Write every DUT and drop records for DUTs no longer in `duts`.
    ///
    /// The hostname index is rebuilt from `duts`; when hostnames collide
    /// the last DUT wins.
    pub fn sync_duts(&self, duts: &[Dut], now: DateTime<Utc>) -> CacheResult<SyncStats> {
        let records = duts
            .iter()
            .map(|dut| -> CacheResult<_> {
                let spec = serde_json::to_string(dut).map_err(map_err!(Serialize))?;
                let record = CachedDut::new(dut, spec, now);
                let bytes = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                Ok((dut, bytes))
            })
            .collect::<CacheResult<Vec<_>>>()?;
        let live: HashSet<&str> = duts.iter().map(|d| d.id.as_str()).collect();

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let stale = {
            let mut by_id = txn.open_table(DUTS_BY_ID).map_err(map_err!(Table))?;
            let stale = keys_where(&by_id, |k| !live.contains(k))?;
            for key in &stale {
                by_id.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            for (dut, bytes) in &records {
                by_id
                    .insert(dut.id.as_str(), bytes.as_slice())
                    .map_err(map_err!(Write))?;
            }

            let mut by_hostname = txn.open_table(DUT_ID_BY_HOSTNAME).map_err(map_err!(Table))?;
            by_hostname.retain(|_, _| false).map_err(map_err!(Write))?;
            for (dut, _) in &records {
                by_hostname
                    .insert(dut.hostname.as_str(), dut.id.as_str())
                    .map_err(map_err!(Write))?;
            }
            stale
        };
        txn.commit().map_err(map_err!(Transaction))?;

        let stats = SyncStats {
            written: records.len(),
            removed: stale.len(),
        };
        info!(written = stats.written, pruned = stats.removed, "dut cache synced");
        Ok(stats)
    }

    pub fn get_dut_by_id(&self, id: &str) -> CacheResult<Option<CachedDut>> {
        self.get_json(DUTS_BY_ID, id)
    }

    pub fn get_dut_by_hostname(&self, hostname: &str) -> CacheResult<Option<CachedDut>> {
        let id = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(DUT_ID_BY_HOSTNAME).map_err(map_err!(Table))?;
            match table.get(hostname).map_err(map_err!(Read))? {
                Some(guard) => guard.value().to_string(),
                None => return Ok(None),
            }
        };
        self.get_dut_by_id(&id)
    }

    // ── Drone configs ──────────────────────────────────────────────

    /// Replace every stored drone configuration with `configs`.
    pub fn put_drone_configs(&self, configs: &[DroneConfig]) -> CacheResult<()> {
        let values = configs
            .iter()
            .map(|c| -> CacheResult<_> {
                let bytes = serde_json::to_vec(c).map_err(map_err!(Serialize))?;
                Ok((c.hostname.as_str(), bytes))
            })
            .collect::<CacheResult<Vec<_>>>()?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DRONE_CONFIGS).map_err(map_err!(Table))?;
            table.retain(|_, _| false).map_err(map_err!(Write))?;
            for (hostname, bytes) in &values {
                table.insert(*hostname, bytes.as_slice()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(drones = configs.len(), "drone configs stored");
        Ok(())
    }

    pub fn get_drone_config(&self, hostname: &str) -> CacheResult<Option<DroneConfig>> {
        self.get_json(DRONE_CONFIGS, hostname)
    }

    // ── Free DUTs ──────────────────────────────────────────────────

    /// Make the free-DUT table hold exactly `free`.
    ///
    /// Entries for DUTs that are no longer free are deleted; every free
    /// DUT is (re-)written with its current removal metadata.
    pub fn reconcile_free_duts(&self, free: &[FreeDut]) -> CacheResult<SyncStats> {
        let values = free
            .iter()
            .map(|f| -> CacheResult<_> {
                let bytes = serde_json::to_vec(f).map_err(map_err!(Serialize))?;
                Ok((f.id.as_str(), bytes))
            })
            .collect::<CacheResult<Vec<_>>>()?;
        let live: HashSet<&str> = free.iter().map(|f| f.id.as_str()).collect();

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let gone = {
            let mut table = txn.open_table(FREE_DUTS).map_err(map_err!(Table))?;
            let gone = keys_where(&table, |k| !live.contains(k))?;
            for key in &gone {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            for (id, bytes) in &values {
                table.insert(*id, bytes.as_slice()).map_err(map_err!(Write))?;
            }
            gone
        };
        txn.commit().map_err(map_err!(Transaction))?;

        let stats = SyncStats {
            written: values.len(),
            removed: gone.len(),
        };
        info!(free = stats.written, removed = stats.removed, "free duts reconciled");
        Ok(stats)
    }

    /// All free DUTs, ordered by id.
    pub fn list_free_duts(&self) -> CacheResult<Vec<FreeDut>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(FREE_DUTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let free: FreeDut = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(free);
        }
        Ok(results)
    }

    // ── Deployments ────────────────────────────────────────────────

    pub fn put_deployment(&self, deployment: &Deployment) -> CacheResult<()> {
        let bytes = serde_json::to_vec(deployment).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            table
                .insert(deployment.id.as_str(), bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deployment_id = %deployment.id, duts = deployment.duts.len(), "deployment stored");
        Ok(())
    }

    pub fn get_deployment(&self, id: &str) -> CacheResult<Option<Deployment>> {
        self.get_json(DEPLOYMENTS, id)
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        def: TableDefinition<'static, &'static str, &'static [u8]>,
        key: &str,
    ) -> CacheResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

}

/// Keys of `table` matching `select`, read in the caller's transaction.
fn keys_where<V: redb::Value + 'static>(
    table: &impl ReadableTable<&'static str, V>,
    select: impl Fn(&str) -> bool,
) -> CacheResult<Vec<String>> {
    let mut keys = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (key, _) = entry.map_err(map_err!(Read))?;
        let k = key.value();
        if select(k) {
            keys.push(k.to_string());
        }
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use labfleet_inventory::{Environment, RemovalReason};
    use std::collections::BTreeMap;

    fn dut(id: &str, hostname: &str) -> Dut {
        Dut {
            id: id.to_string(),
            hostname: hostname.to_string(),
            environment: Environment::Staging,
            model: "link".to_string(),
            pools: vec![],
            attributes: BTreeMap::new(),
            removal_reason: None,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn synced_duts_are_found_by_id_and_hostname() {
        let cache = InventoryCache::open_in_memory().unwrap();
        cache.sync_duts(&[dut("1", "host-1"), dut("2", "host-2")], now()).unwrap();

        let by_id = cache.get_dut_by_id("1").unwrap().unwrap();
        assert_eq!(by_id.hostname, "host-1");
        assert_eq!(by_id.updated, now());
        let spec: Dut = serde_json::from_str(&by_id.serialized_spec).unwrap();
        assert_eq!(spec, dut("1", "host-1"));

        assert_eq!(cache.get_dut_by_hostname("host-2").unwrap().unwrap().id, "2");
        assert!(cache.get_dut_by_id("3").unwrap().is_none());
        assert!(cache.get_dut_by_hostname("host-3").unwrap().is_none());
    }

    #[test]
    fn sync_prunes_deleted_duts_and_stale_hostnames() {
        let cache = InventoryCache::open_in_memory().unwrap();
        cache.sync_duts(&[dut("1", "host-1"), dut("2", "host-2")], now()).unwrap();

        let stats = cache.sync_duts(&[dut("2", "renamed")], now()).unwrap();
        assert_eq!(stats, SyncStats { written: 1, removed: 1 });
        assert!(cache.get_dut_by_id("1").unwrap().is_none());
        assert!(cache.get_dut_by_hostname("host-1").unwrap().is_none());
        assert!(cache.get_dut_by_hostname("host-2").unwrap().is_none());
        assert_eq!(cache.get_dut_by_hostname("renamed").unwrap().unwrap().id, "2");
    }

    #[test]
    fn drone_configs_are_replaced_wholesale() {
        let cache = InventoryCache::open_in_memory().unwrap();
        let a = DroneConfig {
            hostname: "queen-a".to_string(),
            dut_ids: vec!["1".to_string()],
        };
        let b = DroneConfig {
            hostname: "queen-b".to_string(),
            dut_ids: vec![],
        };
        cache.put_drone_configs(&[a.clone(), b]).unwrap();
        assert_eq!(cache.get_drone_config("queen-a").unwrap(), Some(a.clone()));

        cache.put_drone_configs(&[a]).unwrap();
        assert!(cache.get_drone_config("queen-b").unwrap().is_none());
    }

    #[test]
    fn free_dut_reconciliation_adds_and_removes() {
        let cache = InventoryCache::open_in_memory().unwrap();
        let mut removed = dut("1", "host-1");
        removed.removal_reason = Some(RemovalReason {
            bug: "b/1".to_string(),
            comment: "dead".to_string(),
            expire_time: Some(now()),
        });
        cache
            .reconcile_free_duts(&[FreeDut::from_dut(&removed), FreeDut::from_dut(&dut("2", "host-2"))])
            .unwrap();
        let listed = cache.list_free_duts().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].bug, "b/1");
        assert_eq!(listed[0].expire_time, Some(now()));

        // "2" got assigned to a drone.
        let stats = cache.reconcile_free_duts(&[FreeDut::from_dut(&removed)]).unwrap();
        assert_eq!(stats, SyncStats { written: 1, removed: 1 });
        let ids: Vec<_> = cache.list_free_duts().unwrap().into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec!["1".to_string()]);
    }

    #[test]
    fn concurrent_reconciles_leave_exactly_one_set() {
        let cache = InventoryCache::open_in_memory().unwrap();
        let set = |prefix: &str| -> Vec<FreeDut> {
            (0..20)
                .map(|i| FreeDut::from_dut(&dut(&format!("{prefix}-{i:02}"), &format!("host-{prefix}-{i}"))))
                .collect()
        };
        let (a, b) = (set("a"), set("b"));
        let ids = |free: &[FreeDut]| -> Vec<String> { free.iter().map(|f| f.id.clone()).collect() };

        for _ in 0..25 {
            std::thread::scope(|scope| {
                scope.spawn(|| cache.reconcile_free_duts(&a).unwrap());
                scope.spawn(|| cache.reconcile_free_duts(&b).unwrap());
            });
            let listed = ids(&cache.list_free_duts().unwrap());
            assert!(listed == ids(&a) || listed == ids(&b), "mixed free-dut table: {listed:?}");
        }
    }

    #[test]
    fn deployments_are_stored_and_replaced() {
        let cache = InventoryCache::open_in_memory().unwrap();
        let mut deployment = Deployment::new("attempt-1", now());
        deployment.duts.push(DutDeployment::in_progress("host-1"));
        cache.put_deployment(&deployment).unwrap();
        assert_eq!(cache.get_deployment("attempt-1").unwrap(), Some(deployment.clone()));

        deployment.duts[0].succeed();
        cache.put_deployment(&deployment).unwrap();
        let stored = cache.get_deployment("attempt-1").unwrap().unwrap();
        assert_eq!(stored.state(), DeploymentState::Succeeded);
        assert!(cache.get_deployment("attempt-2").unwrap().is_none());
    }

    #[test]
    fn freshness_window() {
        let record = CachedDut::new(&dut("1", "h"), String::new(), now());
        let window = chrono::Duration::seconds(300);
        assert!(record.is_fresh(now() + chrono::Duration::seconds(299), window));
        assert!(!record.is_fresh(now() + chrono::Duration::seconds(301), window));
    }

    #[test]
    fn persistent_cache_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.redb");
        {
            let cache = InventoryCache::open(&path).unwrap();
            cache.sync_duts(&[dut("1", "host-1")], now()).unwrap();
        }
        let cache = InventoryCache::open(&path).unwrap();
        assert!(cache.get_dut_by_hostname("host-1").unwrap().is_some());
    }
}
