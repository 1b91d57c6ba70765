//! Protocol identification and event normalization.
//!
//! The engine supports a closed set of lending protocol families. Every
//! component that behaves differently per protocol matches on
//! [`ProtocolKind`] rather than on a configuration string.

mod events;

pub use events::{LiquidationEvent, ProtocolSubscription, RawLog};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported lending protocol families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolKind {
    /// AAVE V3 and forks (pool + data provider, native health factor)
    AaveV3,
    /// Compound V3 (Comet, absorb-style liquidation)
    CompoundV3,
    /// Compound V2 and forks (cToken markets)
    CompoundV2,
}

impl ProtocolKind {
    /// All supported protocol kinds.
    pub const ALL: [ProtocolKind; 3] = [Self::AaveV3, Self::CompoundV3, Self::CompoundV2];

    /// Stable identifier used in logs and config.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AaveV3 => "aave-v3",
            Self::CompoundV3 => "compound-v3",
            Self::CompoundV2 => "compound-v2",
        }
    }

    /// Whether the protocol reports an authoritative health factor.
    pub fn reports_health_factor(&self) -> bool {
        matches!(self, Self::AaveV3)
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aave-v3" | "aavev3" | "aave_v3" => Ok(Self::AaveV3),
            "compound-v3" | "compoundv3" | "compound_v3" | "comet" => Ok(Self::CompoundV3),
            "compound-v2" | "compoundv2" | "compound_v2" | "ctoken" => Ok(Self::CompoundV2),
            other => anyhow::bail!("Unknown protocol: {}", other),
        }
    }
}
