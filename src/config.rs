use crate::domain::address::Address;
use crate::domain::schedule::DAY;
use crate::error::{PaymentError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Engine tunables. Every field has a default, so a JSON file only needs to
/// name the values it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How far ahead a new stream is funded, in seconds.
    pub funding_horizon_secs: u64,
    pub max_streams_per_user: usize,
    pub max_schedules_per_user: usize,
    /// Upper bound on intervals paid by one schedule execution.
    pub max_catch_up_periods: u64,
    /// Fixed decimals of every flow ledger rate.
    pub ledger_decimals: u8,
    /// Rough cost of one migration retarget, for previews.
    pub retarget_cost_units: u64,
    pub registry_domain: RegistryDomain,
}

/// Values hashed into the domain separator of delegated claims.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegistryDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl Default for RegistryDomain {
    fn default() -> Self {
        Self {
            name: "NamePay Registry".to_string(),
            version: "1".to_string(),
            chain_id: 1,
            verifying_contract: Address::derive("namepay-registry"),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            funding_horizon_secs: 180 * DAY,
            max_streams_per_user: 50,
            max_schedules_per_user: 20,
            max_catch_up_periods: 10,
            ledger_decimals: 20,
            retarget_cost_units: 50_000,
            registry_domain: RegistryDomain::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.funding_horizon_secs == 0 {
            return Err(PaymentError::Config("funding_horizon_secs must be positive".into()));
        }
        if self.max_streams_per_user == 0 || self.max_schedules_per_user == 0 {
            return Err(PaymentError::Config("per-user capacities must be positive".into()));
        }
        if self.max_catch_up_periods == 0 {
            return Err(PaymentError::Config("max_catch_up_periods must be positive".into()));
        }
        if self.ledger_decimals > 28 {
            return Err(PaymentError::Config("ledger_decimals must be at most 28".into()));
        }
        Ok(())
    }
}
