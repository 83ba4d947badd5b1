//! Text encoding of the inventory files.
//!
//! Both files are pretty-printed JSON with a trailing newline so that
//! diffs in the config repository stay line-oriented.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{InventoryError, InventoryResult};
use crate::types::{Infrastructure, Lab};

pub fn load_lab(text: &str) -> InventoryResult<Lab> {
    decode(text, "lab")
}

pub fn write_lab(lab: &Lab) -> InventoryResult<String> {
    encode(lab, "lab")
}

pub fn load_infrastructure(text: &str) -> InventoryResult<Infrastructure> {
    decode(text, "infrastructure")
}

pub fn write_infrastructure(infra: &Infrastructure) -> InventoryResult<String> {
    encode(infra, "infrastructure")
}

fn decode<T: DeserializeOwned>(text: &str, kind: &'static str) -> InventoryResult<T> {
    // An empty file is a valid, empty inventory.
    if text.trim().is_empty() {
        return serde_json::from_str("{}").map_err(|source| InventoryError::Parse { kind, source });
    }
    serde_json::from_str(text).map_err(|source| InventoryError::Parse { kind, source })
}

fn encode<T: Serialize>(value: &T, kind: &'static str) -> InventoryResult<String> {
    let mut text = serde_json::to_string_pretty(value)
        .map_err(|source| InventoryError::Serialize { kind, source })?;
    text.push('\n');
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    #[test]
    fn lab_survives_a_write_and_reload() {
        let lab = Lab {
            duts: vec![Dut {
                id: "dut_id_1".to_string(),
                hostname: "dut_hostname_1".to_string(),
                environment: Environment::Staging,
                model: "link".to_string(),
                pools: vec![DutPool::Suites, DutPool::Cq],
                attributes: BTreeMap::from([("servo_port".to_string(), "9999".to_string())]),
                removal_reason: Some(RemovalReason {
                    bug: "crbug.com/1".to_string(),
                    comment: "flaky usb".to_string(),
                    expire_time: Some(Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()),
                }),
            }],
        };

        let text = write_lab(&lab).unwrap();
        assert!(text.ends_with('\n'));
        assert!(text.contains("DUT_POOL_SUITES"));
        assert_eq!(load_lab(&text).unwrap(), lab);
    }

    #[test]
    fn empty_text_is_an_empty_inventory() {
        assert!(load_lab("").unwrap().duts.is_empty());
        assert!(load_infrastructure("\n").unwrap().servers.is_empty());
    }

    #[test]
    fn minimal_server_record_uses_defaults() {
        let infra = load_infrastructure(
            r#"{"servers": [{"hostname": "drone-1", "roles": ["ROLE_DRONE"]}]}"#,
        )
        .unwrap();
        let server = &infra.servers[0];
        assert!(server.is_drone());
        assert_eq!(server.status, ServerStatus::Primary);
        assert!(server.dut_uids.is_empty());
    }

    #[test]
    fn malformed_text_is_a_parse_error() {
        let err = load_lab("{\"duts\": [ {").unwrap_err();
        assert!(matches!(err, InventoryError::Parse { kind: "lab", .. }));
    }
}
