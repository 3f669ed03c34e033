//! Declarative classification rules and cap pools loaded from TOML.
//!
//! ```toml
//! [[rules]]
//! pattern = "high-cpu"
//! tier = "high_a"
//!
//! [[pools]]
//! name = "high"
//! tiers = ["high_a", "high_b"]
//! cap = 2
//! ```
//!
//! A file that omits `rules` or `pools` keeps the built-in default for that part.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::classify::{ClassificationRule, Classifier};
use crate::error::PolicyError;
use crate::population::{CapPool, PopulationPolicy};
use crate::types::Tier;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyFile {
    #[serde(default)]
    pub rules: Vec<RuleDef>,
    #[serde(default)]
    pub pools: Vec<PoolDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleDef {
    pub pattern: String,
    pub tier: Tier,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolDef {
    pub name: String,
    pub tiers: Vec<Tier>,
    pub cap: usize,
}

/// Validated classifier and population policy, fixed for the process lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedPolicy {
    pub classifier: Classifier,
    pub population: PopulationPolicy,
}

impl PolicyFile {
    pub fn from_toml(s: &str) -> Result<Self, PolicyError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn resolve(self) -> Result<ResolvedPolicy, PolicyError> {
        let classifier = if self.rules.is_empty() {
            Classifier::default()
        } else {
            let mut rules = Vec::with_capacity(self.rules.len());
            for def in self.rules {
                if def.pattern.trim().is_empty() {
                    return Err(PolicyError::EmptyPattern(def.tier.to_string()));
                }
                rules.push(ClassificationRule::new(def.pattern.trim(), def.tier));
            }
            Classifier::new(rules)
        };

        let population = if self.pools.is_empty() {
            PopulationPolicy::default()
        } else {
            PopulationPolicy::new(
                self.pools
                    .into_iter()
                    .map(|p| CapPool {
                        name: p.name,
                        tiers: p.tiers,
                        cap: p.cap,
                    })
                    .collect(),
            )?
        };

        Ok(ResolvedPolicy {
            classifier,
            population,
        })
    }
}
