//! Tier classification: an ordered list of substring rules, first match wins.

use serde::Serialize;

use crate::types::Tier;

/// One classification rule: case-insensitive substring `pattern` → `tier`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationRule {
    pattern: String,
    tier: Tier,
}

impl ClassificationRule {
    pub fn new(pattern: impl Into<String>, tier: Tier) -> Self {
        Self {
            pattern: pattern.into().to_ascii_lowercase(),
            tier,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    fn matches(&self, haystack_lower: &str) -> bool {
        !self.pattern.is_empty() && haystack_lower.contains(&self.pattern)
    }
}

/// Ordered rule set evaluated once per lifecycle record at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classifier {
    rules: Vec<ClassificationRule>,
}

impl Classifier {
    pub fn new(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    /// Classify by identity first, then by display name. Rules are tried in
    /// order against each field; `Unclassified` when nothing matches.
    pub fn classify(&self, identity: &str, display_name: &str) -> Tier {
        let identity = identity.to_ascii_lowercase();
        if let Some(rule) = self.rules.iter().find(|r| r.matches(&identity)) {
            return rule.tier;
        }
        let name = display_name.to_ascii_lowercase();
        self.rules
            .iter()
            .find(|r| r.matches(&name))
            .map_or(Tier::Unclassified, |r| r.tier)
    }
}

impl Default for Classifier {
    /// `high-cpu` → HighA, `high-ram` → HighB, `low` → Low.
    fn default() -> Self {
        Self::new(vec![
            ClassificationRule::new("high-cpu", Tier::HighA),
            ClassificationRule::new("high-ram", Tier::HighB),
            ClassificationRule::new("low", Tier::Low),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rules() {
        let c = Classifier::default();
        assert_eq!(c.classify("stress-high-cpu-1", ""), Tier::HighA);
        assert_eq!(c.classify("stress-high-ram-2", ""), Tier::HighB);
        assert_eq!(c.classify("stress-low-3", ""), Tier::Low);
        assert_eq!(c.classify("grafana-sqlite", ""), Tier::Unclassified);
    }

    #[test]
    fn case_insensitive() {
        let c = Classifier::default();
        assert_eq!(c.classify("STRESS-HIGH-CPU", ""), Tier::HighA);
    }

    #[test]
    fn first_rule_wins() {
        // "high-cpu-low" matches both; rule order decides.
        let c = Classifier::default();
        assert_eq!(c.classify("high-cpu-low", ""), Tier::HighA);

        let reversed = Classifier::new(vec![
            ClassificationRule::new("low", Tier::Low),
            ClassificationRule::new("high-cpu", Tier::HighA),
        ]);
        assert_eq!(reversed.classify("high-cpu-low", ""), Tier::Low);
    }

    #[test]
    fn falls_back_to_display_name() {
        let c = Classifier::default();
        assert_eq!(c.classify("3f2a9c1d", "stress-high-ram"), Tier::HighB);
    }

    #[test]
    fn identity_match_beats_name_match() {
        let c = Classifier::default();
        assert_eq!(c.classify("stress-low-1", "high-cpu worker"), Tier::Low);
    }

    #[test]
    fn empty_pattern_never_matches() {
        let c = Classifier::new(vec![ClassificationRule::new("", Tier::HighA)]);
        assert_eq!(c.classify("anything", "at all"), Tier::Unclassified);
    }
}
