use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

/// Deployment profile an election is provisioned for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Profile {
    /// Keys are issued by voters themselves; private keys are never stored.
    #[default]
    Production,

    /// Every voter is issued a key pair at provisioning time and the
    /// anonymity set is folded immediately.
    Simulation,

    /// Same as [`Profile::Simulation`], and the folded set is also anchored
    /// on the ledger.
    SimulationFull,
}

impl Profile {
    pub const ALL: [Self; 3] = [Self::Production, Self::Simulation, Self::SimulationFull];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Simulation => "simulation",
            Self::SimulationFull => "simulation-full",
        }
    }

    /// Whether voters' private keys may be written to the database.
    #[must_use]
    pub const fn persists_private_keys(self) -> bool {
        !matches!(self, Self::Production)
    }

    /// Whether every voter gets a key pair while seeding.
    #[must_use]
    pub const fn issues_keys_at_seed_time(self) -> bool {
        !matches!(self, Self::Production)
    }

    #[must_use]
    pub const fn folds_at_seed_time(self) -> bool {
        !matches!(self, Self::Production)
    }

    #[must_use]
    pub const fn anchors_at_seed_time(self) -> bool {
        matches!(self, Self::SimulationFull)
    }
}

impl Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|profile| profile.as_str() == s)
            .ok_or_else(|| {
                format!("invalid profile '{s}': use production, simulation, or simulation-full")
            })
    }
}

/// Total number of users an election is provisioned with, including the
/// named accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserCount(u32);

impl UserCount {
    pub const MIN: u32 = 3;
    pub const MAX: u32 = 1_000_000;

    /// Clamps `count` into `[MIN, MAX]`.
    #[must_use]
    pub fn clamped(count: u64) -> Self {
        Self(count.clamp(u64::from(Self::MIN), u64::from(Self::MAX)) as u32)
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl Default for UserCount {
    fn default() -> Self {
        Self(Self::MIN)
    }
}

impl TryFrom<u32> for UserCount {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(format!(
                "user count must be between {} and {}, got {value}",
                Self::MIN,
                Self::MAX
            ))
        }
    }
}

impl FromStr for UserCount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u32 = s
            .parse()
            .map_err(|e| format!("invalid user count '{s}': {e}"))?;
        Self::try_from(value)
    }
}

impl<'de> Deserialize<'de> for UserCount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = u32::deserialize(deserializer)?;
        Self::try_from(value).map_err(serde::de::Error::custom)
    }
}

impl Display for UserCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
