//! Knowledge cards and the store that holds them
//!
//! The learning core only talks to cards through [`KnowledgeStore`]. Cards
//! carry a scope and an expertise level which together place them on the
//! four-step tier ladder the promotion engine moves them along.

pub mod local;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use local::LocalKnowledgeStore;

/// Tag carried by cards the engine has promoted
pub const HIGH_EFFECTIVENESS_TAG: &str = "high-effectiveness";

/// Effectiveness assumed for cards that have never been scored
pub const DEFAULT_CARD_EFFECTIVENESS: f64 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardScope {
    #[default]
    Project,
    Global,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpertiseLevel {
    #[default]
    Standard,
    Expert,
}

/// Ordered position of a card: project-standard < project-expert < global-standard < global-expert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CardTier {
    ProjectStandard,
    ProjectExpert,
    GlobalStandard,
    GlobalExpert,
}

impl CardTier {
    const LADDER: [CardTier; 4] = [
        CardTier::ProjectStandard,
        CardTier::ProjectExpert,
        CardTier::GlobalStandard,
        CardTier::GlobalExpert,
    ];

    pub fn of(scope: CardScope, level: ExpertiseLevel) -> Self {
        match (scope, level) {
            (CardScope::Project, ExpertiseLevel::Standard) => CardTier::ProjectStandard,
            (CardScope::Project, ExpertiseLevel::Expert) => CardTier::ProjectExpert,
            (CardScope::Global, ExpertiseLevel::Standard) => CardTier::GlobalStandard,
            (CardScope::Global, ExpertiseLevel::Expert) => CardTier::GlobalExpert,
        }
    }

    pub fn scope(&self) -> CardScope {
        match self {
            CardTier::ProjectStandard | CardTier::ProjectExpert => CardScope::Project,
            CardTier::GlobalStandard | CardTier::GlobalExpert => CardScope::Global,
        }
    }

    pub fn level(&self) -> ExpertiseLevel {
        match self {
            CardTier::ProjectStandard | CardTier::GlobalStandard => ExpertiseLevel::Standard,
            CardTier::ProjectExpert | CardTier::GlobalExpert => ExpertiseLevel::Expert,
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }

    /// One step up, staying at global-expert
    pub fn promoted(&self) -> Self {
        Self::LADDER[(self.index() + 1).min(Self::LADDER.len() - 1)]
    }

    /// One step down, staying at project-standard
    pub fn demoted(&self) -> Self {
        Self::LADDER[self.index().saturating_sub(1)]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CardTier::ProjectStandard => "project-standard",
            CardTier::ProjectExpert => "project-expert",
            CardTier::GlobalStandard => "global-standard",
            CardTier::GlobalExpert => "global-expert",
        }
    }
}

impl std::fmt::Display for CardTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A reusable piece of knowledge agents consult while working
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeCard {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub scope: CardScope,
    #[serde(default)]
    pub level: ExpertiseLevel,
    /// Owning project for project-scoped cards
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Last stored effectiveness in [0, 1], absent until first scored
    #[serde(default)]
    pub effectiveness: Option<f64>,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeCard {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            content: String::new(),
            category: "general".to_string(),
            scope: CardScope::Project,
            level: ExpertiseLevel::Standard,
            project_id: None,
            tags: Vec::new(),
            effectiveness: None,
            usage_count: 0,
            last_used: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_tier(mut self, tier: CardTier) -> Self {
        self.scope = tier.scope();
        self.level = tier.level();
        self
    }

    pub fn with_effectiveness(mut self, effectiveness: f64) -> Self {
        self.effectiveness = Some(effectiveness);
        self
    }

    pub fn tier(&self) -> CardTier {
        CardTier::of(self.scope, self.level)
    }

    /// Stored effectiveness, or the neutral default for unscored cards
    pub fn stored_effectiveness(&self) -> f64 {
        self.effectiveness.unwrap_or(DEFAULT_CARD_EFFECTIVENESS)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Partial update applied by [`KnowledgeStore::update_card`]; `None` leaves a field alone
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<CardScope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<ExpertiseLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effectiveness: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl CardPatch {
    pub fn tier(mut self, tier: CardTier) -> Self {
        self.scope = Some(tier.scope());
        self.level = Some(tier.level());
        self
    }

    pub fn apply(&self, card: &mut KnowledgeCard) {
        if let Some(scope) = self.scope {
            card.scope = scope;
        }
        if let Some(level) = self.level {
            card.level = level;
        }
        if let Some(effectiveness) = self.effectiveness {
            card.effectiveness = Some(effectiveness);
        }
        if let Some(tags) = &self.tags {
            card.tags = tags.clone();
        }
        card.updated_at = Utc::now();
    }
}

/// Card search request; an empty query matches every card
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardQuery {
    pub text: Option<String>,
    pub category: Option<String>,
    pub scope: Option<CardScope>,
    pub limit: Option<usize>,
}

impl CardQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardSearchHit {
    pub card: KnowledgeCard,
    pub relevance_score: f64,
}

/// What the store is told about one usage of a card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub relevance: f64,
    pub effectiveness: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeStats {
    pub total_cards: usize,
    pub by_tier: BTreeMap<String, usize>,
    pub total_usages: u64,
    pub average_effectiveness: f64,
}

/// Capability the learning core needs from a card store
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn get_card(&self, id: &str) -> Result<Option<KnowledgeCard>>;

    async fn update_card(&self, id: &str, patch: CardPatch) -> Result<KnowledgeCard>;

    async fn delete_card(&self, id: &str) -> Result<()>;

    async fn search_cards(&self, query: &CardQuery) -> Result<Vec<CardSearchHit>>;

    async fn record_usage(&self, card_id: &str, job_id: &str, summary: &UsageSummary) -> Result<()>;

    async fn get_stats(&self) -> Result<KnowledgeStats>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_order() {
        assert!(CardTier::ProjectStandard < CardTier::ProjectExpert);
        assert!(CardTier::ProjectExpert < CardTier::GlobalStandard);
        assert!(CardTier::GlobalStandard < CardTier::GlobalExpert);
    }

    #[test]
    fn test_tier_steps_saturate() {
        assert_eq!(CardTier::ProjectStandard.promoted(), CardTier::ProjectExpert);
        assert_eq!(CardTier::ProjectExpert.promoted(), CardTier::GlobalStandard);
        assert_eq!(CardTier::GlobalExpert.promoted(), CardTier::GlobalExpert);
        assert_eq!(CardTier::GlobalStandard.demoted(), CardTier::ProjectExpert);
        assert_eq!(CardTier::ProjectStandard.demoted(), CardTier::ProjectStandard);
    }

    #[test]
    fn test_tier_round_trips_scope_and_level() {
        for tier in CardTier::LADDER {
            assert_eq!(CardTier::of(tier.scope(), tier.level()), tier);
        }
        assert_eq!(serde_json::to_string(&CardTier::GlobalExpert).unwrap(), "\"global-expert\"");
    }

    #[test]
    fn test_patch_applies_only_set_fields() {
        let mut card = KnowledgeCard::new("c1", "Retry flaky network calls").with_effectiveness(0.4);
        card.tags = vec!["network".to_string()];

        CardPatch {
            effectiveness: Some(0.7),
            ..Default::default()
        }
        .tier(CardTier::GlobalStandard)
        .apply(&mut card);

        assert_eq!(card.tier(), CardTier::GlobalStandard);
        assert_eq!(card.effectiveness, Some(0.7));
        assert_eq!(card.tags, vec!["network".to_string()]);
    }

    #[test]
    fn test_unscored_card_uses_default() {
        assert_eq!(KnowledgeCard::new("c", "t").stored_effectiveness(), DEFAULT_CARD_EFFECTIVENESS);
    }
}
