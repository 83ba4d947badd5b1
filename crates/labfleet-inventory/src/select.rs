//! DUT selection for pool operations.

use serde::{Deserialize, Serialize};

use crate::error::{InventoryError, InventoryResult};
use crate::types::Dut;

/// Matches DUTs on every field that is set. At least one field is required.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DutSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl DutSelector {
    pub fn model(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> InventoryResult<()> {
        let set = |f: &Option<String>| f.as_deref().is_some_and(|s| !s.is_empty());
        if set(&self.id) || set(&self.hostname) || set(&self.model) {
            Ok(())
        } else {
            Err(InventoryError::InvalidArgument(
                "dut selector must set at least one of id, hostname, model".to_string(),
            ))
        }
    }

    pub fn matches(&self, dut: &Dut) -> bool {
        fn field_ok(want: &Option<String>, have: &str) -> bool {
            match want.as_deref() {
                None | Some("") => true,
                Some(w) => w == have,
            }
        }
        field_ok(&self.id, &dut.id)
            && field_ok(&self.hostname, &dut.hostname)
            && field_ok(&self.model, &dut.model)
    }
}
