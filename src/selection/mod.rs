//! Node Group Selector
//!
//! Narrows a cluster's node groups to the ones eligible for protection.
//! Tiers are evaluated in order and the first non-empty result wins:
//!
//! | Tier       | Patterns                       | Keeps      |
//! |------------|--------------------------------|------------|
//! | `strict`   | `nodegroup-[0-9]-ondemand`     | all        |
//! | `numbered` | `nodegroup-[0-9]-*`            | all        |
//! | `fallback` | `nodegroup-*`, then `*`        | first only |

use crate::error::{Error, Result};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use tracing::debug;

// =============================================================================
// Matcher Tiers
// =============================================================================

/// How many matches a tier keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TierTake {
    All,
    /// Lexicographically first match only
    FirstOnly,
}

/// One matcher strategy in the selection chain
#[derive(Debug, Clone)]
pub struct MatcherTier {
    name: String,
    /// Tried in order; the first pattern with any match decides the tier
    patterns: Vec<Pattern>,
    take: TierTake,
}

impl MatcherTier {
    pub fn new(name: impl Into<String>, patterns: &[&str], take: TierTake) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Pattern::new(p)
                    .map_err(|e| Error::Configuration(format!("invalid tier pattern {}: {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: name.into(),
            patterns,
            take,
        })
    }

    /// Built-in tier; patterns that fail to compile are skipped
    fn builtin(name: &str, patterns: &[&str], take: TierTake) -> Self {
        Self {
            name: name.to_string(),
            patterns: patterns.iter().filter_map(|p| Pattern::new(p).ok()).collect(),
            take,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply this tier to sorted, de-duplicated names
    pub fn select(&self, names: &[String]) -> Vec<String> {
        for pattern in &self.patterns {
            let matched: Vec<String> = names
                .iter()
                .filter(|name| pattern.matches(name))
                .cloned()
                .collect();

            if matched.is_empty() {
                continue;
            }

            return match self.take {
                TierTake::All => matched,
                TierTake::FirstOnly => matched.into_iter().take(1).collect(),
            };
        }

        Vec::new()
    }
}

// =============================================================================
// Selection
// =============================================================================

/// Outcome of node-group selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    /// Name of the tier that matched, `None` when nothing matched
    pub tier: Option<String>,
    /// In-scope node groups, sorted
    pub node_groups: Vec<String>,
}

impl Selection {
    /// True when no tier matched (`NoMatchingGroups`)
    pub fn is_empty(&self) -> bool {
        self.node_groups.is_empty()
    }
}

/// Ordered chain of matcher tiers
#[derive(Debug, Clone)]
pub struct NodeGroupSelector {
    tiers: Vec<MatcherTier>,
}

impl Default for NodeGroupSelector {
    /// The three standard tiers
    fn default() -> Self {
        Self::new(vec![
            MatcherTier::builtin("strict", &["nodegroup-[0-9]-ondemand"], TierTake::All),
            MatcherTier::builtin("numbered", &["nodegroup-[0-9]-*"], TierTake::All),
            MatcherTier::builtin("fallback", &["nodegroup-*", "*"], TierTake::FirstOnly),
        ])
    }
}

impl NodeGroupSelector {
    pub fn new(tiers: Vec<MatcherTier>) -> Self {
        Self { tiers }
    }

    pub fn tiers(&self) -> &[MatcherTier] {
        &self.tiers
    }

    /// Select the in-scope node groups
    pub fn select(&self, names: &[String]) -> Selection {
        let mut sorted = names.to_vec();
        sorted.sort();
        sorted.dedup();

        for tier in &self.tiers {
            let node_groups = tier.select(&sorted);
            if !node_groups.is_empty() {
                debug!(tier = tier.name(), selected = ?node_groups, "Node group tier matched");
                return Selection {
                    tier: Some(tier.name().to_string()),
                    node_groups,
                };
            }
        }

        debug!(candidates = sorted.len(), "No node group tier matched");
        Selection::default()
    }
}
