//! Startup and security configuration.
//!
//! Grounded on `QuantumGateLib/Core/Local.h`'s `StartupParameters` and
//! `SecurityLevel`/`SecurityParameters` pair: a process is started once
//! with a `StartupParameters` tree, and its wire-facing timing/size knobs
//! come from one of five fixed `SecurityParameters` presets or a validated
//! `Custom` set. Both trees are `serde`-deserializable from TOML behind
//! the `config` feature so a host application can ship them as a file
//! rather than build them by hand.

mod security;
mod startup;

pub use security::{
    KeyUpdateParameters, MessageParameters, NoiseParameters, SecurityLevel, SecurityParameters,
};
pub use startup::{
    KeyPair, ListenersConfig, RelaysConfig, StartupParameters, SupportedAlgorithms,
};

pub(crate) mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (value.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
