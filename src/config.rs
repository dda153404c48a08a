//! Bridge-wide settings.
//!
//! A plain options struct passed to the orchestrators. Every field has a
//! default, so partial JSON documents deserialize.

use std::time::Duration;

use crate::bc::{TransferOptions, UnmatchedPolicy};
use crate::bridge_error::BridgeError;
use crate::exec::ExecSettings;

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Edge-coincidence epsilon for boundary-tag transfer.
    pub tolerance: f64,
    /// Unmatched-edge policy for direct [`crate::bc::propagate_tags`] calls.
    pub unmatched: UnmatchedPolicy,
    /// How often the driving thread wakes while a native call runs.
    pub poll_interval_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            unmatched: UnmatchedPolicy::Omit,
            poll_interval_ms: 20,
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<(), BridgeError> {
        self.transfer_options().validate()?;
        if self.poll_interval_ms == 0 {
            return Err(BridgeError::InvalidConfig(
                "poll_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            tolerance: self.tolerance,
            unmatched: self.unmatched,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn exec_settings(&self) -> ExecSettings {
        ExecSettings {
            poll_interval: self.poll_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let c = BridgeConfig::default();
        c.validate().unwrap();
        assert_eq!(c.exec_settings(), ExecSettings::default());
    }

    #[test]
    fn rejects_bad_values() {
        let c = BridgeConfig {
            tolerance: -1.0,
            ..Default::default()
        };
        assert_eq!(c.validate(), Err(BridgeError::InvalidTolerance(-1.0)));
        let c = BridgeConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(c.validate(), Err(BridgeError::InvalidConfig(_))));
    }
}
