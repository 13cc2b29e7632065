//! Plan tiers and the static plan table.

use parley_common::{Error, PlanConfig, PlansConfig, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A named quota/capability class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Basic,
    Pro,
}

impl PlanTier {
    /// Storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Basic => "basic",
            Self::Pro => "pro",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "free" => Some(Self::Free),
            "basic" => Some(Self::Basic),
            "pro" => Some(Self::Pro),
            _ => None,
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Free => "Free",
            Self::Basic => "Basic",
            Self::Pro => "Pro",
        };
        f.write_str(label)
    }
}

/// A feature a plan may or may not include.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    ImageGeneration,
    VideoDownload,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::ImageGeneration => "image_generation",
            Self::VideoDownload => "video_download",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "chat" => Some(Self::Chat),
            "image_generation" => Some(Self::ImageGeneration),
            "video_download" => Some(Self::VideoDownload),
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Chat => "Chat",
            Self::ImageGeneration => "Image generation",
            Self::VideoDownload => "Video download",
        };
        f.write_str(label)
    }
}

/// A daily allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Limit {
    Limited(u64),
    Unlimited,
}

impl Limit {
    /// Configuration encodes "no limit" as `0`.
    pub fn from_config(value: u64) -> Self {
        if value == 0 {
            Self::Unlimited
        } else {
            Self::Limited(value)
        }
    }

    /// `None` for unlimited.
    pub fn as_option(self) -> Option<u64> {
        match self {
            Self::Limited(n) => Some(n),
            Self::Unlimited => None,
        }
    }

    pub fn from_option(value: Option<u64>) -> Self {
        value.map_or(Self::Unlimited, Self::Limited)
    }

    /// Units left before the allowance is reached; `None` if unlimited.
    pub fn remaining(self, used: u64) -> Option<u64> {
        self.as_option().map(|limit| limit.saturating_sub(used))
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limited(n) => write!(f, "{n}"),
            Self::Unlimited => f.write_str("unlimited"),
        }
    }
}

/// Limits and capabilities of one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanDefinition {
    pub tokens_limit: Limit,
    pub assets_limit: Limit,
    pub capabilities: Vec<Capability>,
}

impl PlanDefinition {
    fn from_config(name: &str, config: &PlanConfig) -> Result<Self> {
        let capabilities = config
            .capabilities
            .iter()
            .map(|raw| {
                Capability::parse(raw).ok_or_else(|| {
                    Error::Config(format!("plans.{name}: unknown capability '{raw}'"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            tokens_limit: Limit::from_config(config.tokens_limit),
            assets_limit: Limit::from_config(config.assets_limit),
            capabilities,
        })
    }

    pub fn allows(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Mapping from tier to its definition, supplied as static configuration.
#[derive(Debug, Clone)]
pub struct PlanTable {
    free: PlanDefinition,
    basic: PlanDefinition,
    pro: PlanDefinition,
}

impl PlanTable {
    pub fn from_config(config: &PlansConfig) -> Result<Self> {
        Ok(Self {
            free: PlanDefinition::from_config("free", &config.free)?,
            basic: PlanDefinition::from_config("basic", &config.basic)?,
            pro: PlanDefinition::from_config("pro", &config.pro)?,
        })
    }

    pub fn get(&self, tier: PlanTier) -> &PlanDefinition {
        match tier {
            PlanTier::Free => &self.free,
            PlanTier::Basic => &self.basic,
            PlanTier::Pro => &self.pro,
        }
    }
}

impl Default for PlanTable {
    fn default() -> Self {
        let all = vec![
            Capability::Chat,
            Capability::ImageGeneration,
            Capability::VideoDownload,
        ];
        Self {
            free: PlanDefinition {
                tokens_limit: Limit::Limited(10_000),
                assets_limit: Limit::Limited(3),
                capabilities: vec![Capability::Chat, Capability::ImageGeneration],
            },
            basic: PlanDefinition {
                tokens_limit: Limit::Limited(100_000),
                assets_limit: Limit::Limited(20),
                capabilities: all.clone(),
            },
            pro: PlanDefinition {
                tokens_limit: Limit::Unlimited,
                assets_limit: Limit::Unlimited,
                capabilities: all,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_matches_default_config() {
        let from_config = PlanTable::from_config(&PlansConfig::default()).unwrap();
        let builtin = PlanTable::default();
        for tier in [PlanTier::Free, PlanTier::Basic, PlanTier::Pro] {
            assert_eq!(from_config.get(tier), builtin.get(tier));
        }
    }

    #[test]
    fn test_zero_limit_is_unlimited() {
        assert_eq!(Limit::from_config(0), Limit::Unlimited);
        assert_eq!(Limit::from_config(5), Limit::Limited(5));
    }

    #[test]
    fn test_remaining() {
        assert_eq!(Limit::Limited(10).remaining(3), Some(7));
        assert_eq!(Limit::Limited(10).remaining(15), Some(0));
        assert_eq!(Limit::Unlimited.remaining(15), None);
    }

    #[test]
    fn test_unknown_capability_rejected() {
        let mut config = PlansConfig::default();
        config.pro.capabilities.push("teleport".into());
        let err = PlanTable::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("teleport"));
    }

    #[test]
    fn test_tier_parse() {
        assert_eq!(PlanTier::parse("Basic"), Some(PlanTier::Basic));
        assert_eq!(PlanTier::parse(" pro "), Some(PlanTier::Pro));
        assert_eq!(PlanTier::parse("gold"), None);
        assert_eq!(PlanTier::Free.as_str(), "free");
    }
}
