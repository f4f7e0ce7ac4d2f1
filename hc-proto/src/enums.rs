//! Wire-stable enums shared between the config layer, the persistence
//! layer and the control core. Values are fixed lower-case tokens;
//! renaming any of them is a wire-compatibility break.

use serde::{Deserialize, Serialize};

/// Per-object runtime mode. Applies to a single consumer (circuit, DHWT,
/// heatsource), as opposed to [`Systemmode`] which is the global policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runmode {
    Off,
    Auto,
    Comfort,
    Eco,
    Frostfree,
    Dhwonly,
    Test,
    Summaint,
    Unknown,
}

impl Default for Runmode {
    fn default() -> Self {
        Runmode::Unknown
    }
}

/// Global system-wide policy, feeding per-object defaults into [`Runmode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Systemmode {
    Off,
    Auto,
    Manual,
    Comfort,
    Eco,
    Frostfree,
    Dhwonly,
    Test,
    Summaint,
    None,
    Unknown,
}

impl Default for Systemmode {
    fn default() -> Self {
        Systemmode::Unknown
    }
}

/// DHWT charge-priority scheme relative to heating circuits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DhwtPriority {
    Paralmax,
    Paraldhw,
    Slidmax,
    Sliddhw,
    Absolute,
}

/// Electric (self-heater) force mode for a DHWT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForceMode {
    Never,
    First,
    Always,
}

/// Boiler idle behaviour when there is no heat request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoilerIdleMode {
    Never,
    Always,
    Frostonly,
}

/// Valve motor drive topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValveMotor {
    #[serde(rename = "3way")]
    ThreeWay,
    #[serde(rename = "2way")]
    TwoWay,
}

/// Valve functional type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValveType {
    Mix,
    Isol,
}

/// Selectable mixing-valve temperature-control algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValveAlgo {
    Bangbang,
    Sapprox,
    #[serde(rename = "PI")]
    Pi,
}

/// Sensor/relay aggregation operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggOp {
    First,
    Min,
    Max,
}

/// Sensor missing-source policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingPolicy {
    Fail,
    Ignore,
    Ignoredef,
}

/// Relay dispatch policy across backend targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchOp {
    First,
    All,
}

/// Relay missing-target policy (distinct from sensor [`MissingPolicy`]:
/// relays have no "ignore with default" mode since there is no sensible
/// default actuator state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMissingPolicy {
    Fail,
    Ignore,
}
