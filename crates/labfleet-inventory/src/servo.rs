//! Servo port allocation for DUTs entering the fleet.
//!
//! A servo host serves many DUTs, one port each. Ports are handed out
//! from the top of the range servod generates, 9999 down to 9901.

use std::collections::BTreeSet;
use std::ops::RangeInclusive;

use tracing::debug;

use crate::error::{InventoryError, InventoryResult};
use crate::types::Dut;

pub const SERVO_HOST_ATTRIBUTE: &str = "servo_host";
pub const SERVO_PORT_ATTRIBUTE: &str = "servo_port";

const SERVO_PORTS: RangeInclusive<u16> = 9901..=9999;

pub fn has_servo_port(dut: &Dut) -> bool {
    dut.attributes.contains_key(SERVO_PORT_ATTRIBUTE)
}

/// Ports taken by DUTs on `servo_host`. Ports that do not parse are ignored.
pub fn used_servo_ports<'a>(duts: impl IntoIterator<Item = &'a Dut>, servo_host: &str) -> BTreeSet<u16> {
    duts.into_iter()
        .filter(|d| d.attributes.get(SERVO_HOST_ATTRIBUTE).map(String::as_str) == Some(servo_host))
        .filter_map(|d| d.attributes.get(SERVO_PORT_ATTRIBUTE)?.parse().ok())
        .collect()
}

/// Highest port in the servo range not in `used`.
pub fn find_free_port(used: &BTreeSet<u16>) -> Option<u16> {
    SERVO_PORTS.rev().find(|p| !used.contains(p))
}

/// Give `dut` a servo port no other DUT on its servo host uses.
pub fn assign_servo_port<'a>(duts: impl IntoIterator<Item = &'a Dut>, dut: &mut Dut) -> InventoryResult<u16> {
    let servo_host = dut
        .attributes
        .get(SERVO_HOST_ATTRIBUTE)
        .cloned()
        .ok_or_else(|| InventoryError::InvalidArgument(format!("no {SERVO_HOST_ATTRIBUTE} attribute in specs")))?;
    let used = used_servo_ports(duts, &servo_host);
    let port = find_free_port(&used).ok_or_else(|| InventoryError::NoFreeServoPort(servo_host.clone()))?;
    dut.attributes
        .insert(SERVO_PORT_ATTRIBUTE.to_string(), port.to_string());
    debug!(hostname = %dut.hostname, %servo_host, port, "servo port assigned");
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Environment;
    use std::collections::BTreeMap;

    fn dut(hostname: &str, servo_host: &str, port: Option<&str>) -> Dut {
        let mut attributes = BTreeMap::from([(SERVO_HOST_ATTRIBUTE.to_string(), servo_host.to_string())]);
        if let Some(port) = port {
            attributes.insert(SERVO_PORT_ATTRIBUTE.to_string(), port.to_string());
        }
        Dut {
            id: format!("id-{hostname}"),
            hostname: hostname.to_string(),
            environment: Environment::Staging,
            model: "link".to_string(),
            pools: vec![],
            attributes,
            removal_reason: None,
        }
    }

    #[test]
    fn picks_the_highest_port_free_on_the_same_host() {
        let lab = vec![
            dut("a", "labstation-1", Some("9999")),
            dut("b", "labstation-1", Some("9998")),
            dut("c", "labstation-2", Some("9997")),
            dut("d", "labstation-1", Some("not-a-port")),
        ];
        let mut new = dut("new", "labstation-1", None);
        assert_eq!(assign_servo_port(&lab, &mut new).unwrap(), 9997);
        assert_eq!(new.attributes[SERVO_PORT_ATTRIBUTE], "9997");
        assert!(has_servo_port(&new));
    }

    #[test]
    fn gaps_are_reused() {
        let used = BTreeSet::from([9999, 9997]);
        assert_eq!(find_free_port(&used), Some(9998));
        assert_eq!(find_free_port(&BTreeSet::new()), Some(9999));
    }

    #[test]
    fn full_range_is_an_error() {
        let lab: Vec<Dut> = SERVO_PORTS
            .map(|p| dut(&format!("d{p}"), "labstation-1", Some(&p.to_string())))
            .collect();
        let mut new = dut("new", "labstation-1", None);
        assert!(matches!(
            assign_servo_port(&lab, &mut new),
            Err(InventoryError::NoFreeServoPort(host)) if host == "labstation-1"
        ));
        assert!(!has_servo_port(&new));
    }

    #[test]
    fn servo_host_is_required() {
        let mut new = dut("new", "x", None);
        new.attributes.clear();
        assert!(matches!(
            assign_servo_port(&[], &mut new),
            Err(InventoryError::InvalidArgument(_))
        ));
    }
}
