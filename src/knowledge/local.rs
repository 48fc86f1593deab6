//! In-process knowledge store, optionally backed by a JSON file

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{CardPatch, CardQuery, CardSearchHit, KnowledgeCard, KnowledgeStats, KnowledgeStore, UsageSummary};

pub struct LocalKnowledgeStore {
    cards: RwLock<BTreeMap<String, KnowledgeCard>>,
    /// Cards are rewritten here after every change when set
    path: Option<PathBuf>,
}

impl LocalKnowledgeStore {
    pub fn in_memory() -> Self {
        Self {
            cards: RwLock::new(BTreeMap::new()),
            path: None,
        }
    }

    /// Load cards from a JSON array file; a missing file starts empty
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let cards = match tokio::fs::read_to_string(&path).await {
            Ok(json) => {
                let list: Vec<KnowledgeCard> = serde_json::from_str(&json)
                    .with_context(|| format!("Failed to parse knowledge cards in {}", path.display()))?;
                list.into_iter().map(|c| (c.id.clone(), c)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };
        info!("Loaded {} knowledge cards from {}", cards.len(), path.display());
        Ok(Self {
            cards: RwLock::new(cards),
            path: Some(path),
        })
    }

    /// Insert or replace a card
    pub async fn insert(&self, card: KnowledgeCard) -> Result<()> {
        self.change(|cards| {
            cards.insert(card.id.clone(), card);
            Ok(())
        })
        .await
    }

    pub async fn len(&self) -> usize {
        self.cards.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cards.read().await.is_empty()
    }

    /// Apply `edit` to a copy of the cards and keep it only once it is saved
    async fn change<T>(&self, edit: impl FnOnce(&mut BTreeMap<String, KnowledgeCard>) -> Result<T>) -> Result<T> {
        let mut cards = self.cards.write().await;
        let mut next = cards.clone();
        let value = edit(&mut next)?;
        self.persist(&next).await?;
        *cards = next;
        Ok(value)
    }

    async fn persist(&self, cards: &BTreeMap<String, KnowledgeCard>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let list: Vec<&KnowledgeCard> = cards.values().collect();
        let json = serde_json::to_string_pretty(&list)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!("Saved {} knowledge cards to {}", list.len(), path.display());
        Ok(())
    }
}

/// Share of query terms found in the card's title, content, category or tags
fn relevance(card: &KnowledgeCard, terms: &[String]) -> f64 {
    if terms.is_empty() {
        return 1.0;
    }
    let haystack = format!("{} {} {} {}", card.title, card.content, card.category, card.tags.join(" ")).to_lowercase();
    let hits = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
    hits as f64 / terms.len() as f64
}

#[async_trait::async_trait]
impl KnowledgeStore for LocalKnowledgeStore {
    async fn get_card(&self, id: &str) -> Result<Option<KnowledgeCard>> {
        Ok(self.cards.read().await.get(id).cloned())
    }

    async fn update_card(&self, id: &str, patch: CardPatch) -> Result<KnowledgeCard> {
        self.change(|cards| {
            let card = cards
                .get_mut(id)
                .ok_or_else(|| anyhow::anyhow!("Knowledge card not found: {}", id))?;
            patch.apply(card);
            Ok(card.clone())
        })
        .await
    }

    async fn delete_card(&self, id: &str) -> Result<()> {
        self.change(|cards| match cards.remove(id) {
            Some(_) => Ok(()),
            None => anyhow::bail!("Knowledge card not found: {}", id),
        })
        .await
    }

    async fn search_cards(&self, query: &CardQuery) -> Result<Vec<CardSearchHit>> {
        let terms: Vec<String> = query
            .text
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();

        let cards = self.cards.read().await;
        let mut hits: Vec<CardSearchHit> = cards
            .values()
            .filter(|c| query.category.as_ref().map_or(true, |cat| &c.category == cat))
            .filter(|c| query.scope.map_or(true, |scope| c.scope == scope))
            .map(|c| CardSearchHit {
                relevance_score: relevance(c, &terms),
                card: c.clone(),
            })
            .filter(|hit| hit.relevance_score > 0.0)
            .collect();

        hits.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.card.id.cmp(&b.card.id))
        });
        if let Some(limit) = query.limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }

    async fn record_usage(&self, card_id: &str, job_id: &str, summary: &UsageSummary) -> Result<()> {
        self.change(|cards| {
            let card = cards
                .get_mut(card_id)
                .ok_or_else(|| anyhow::anyhow!("Knowledge card not found: {}", card_id))?;
            card.usage_count += 1;
            card.last_used = Some(card.last_used.map_or(summary.timestamp, |t| t.max(summary.timestamp)));
            Ok(())
        })
        .await?;
        debug!("Recorded usage of {} by job {}", card_id, job_id);
        Ok(())
    }

    async fn get_stats(&self) -> Result<KnowledgeStats> {
        let cards = self.cards.read().await;
        let mut stats = KnowledgeStats {
            total_cards: cards.len(),
            ..Default::default()
        };
        let mut effectiveness_sum = 0.0;
        for card in cards.values() {
            *stats.by_tier.entry(card.tier().to_string()).or_default() += 1;
            stats.total_usages += card.usage_count;
            effectiveness_sum += card.stored_effectiveness();
        }
        if !cards.is_empty() {
            stats.average_effectiveness = effectiveness_sum / cards.len() as f64;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::CardTier;
    use chrono::Utc;

    fn card(id: &str, title: &str) -> KnowledgeCard {
        KnowledgeCard::new(id, title)
    }

    #[tokio::test]
    async fn test_search_ranks_by_matched_terms() {
        let store = LocalKnowledgeStore::in_memory();
        store.insert(card("a", "Retry flaky network calls")).await.unwrap();
        store.insert(card("b", "Network timeouts in CI")).await.unwrap();
        store.insert(card("c", "Formatting conventions")).await.unwrap();

        let hits = store.search_cards(&CardQuery::text("flaky network")).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.card.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(hits[0].relevance_score, 1.0);

        assert_eq!(store.search_cards(&CardQuery::all()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_record_usage_counts() {
        let store = LocalKnowledgeStore::in_memory();
        store.insert(card("a", "A")).await.unwrap();
        let summary = UsageSummary {
            timestamp: Utc::now(),
            success: true,
            relevance: 0.9,
            effectiveness: 0.8,
        };
        store.record_usage("a", "job-1", &summary).await.unwrap();
        store.record_usage("a", "job-2", &summary).await.unwrap();

        let stored = store.get_card("a").await.unwrap().unwrap();
        assert_eq!(stored.usage_count, 2);
        assert!(store.record_usage("missing", "job-1", &summary).await.is_err());
    }

    #[tokio::test]
    async fn test_persists_between_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knowledge").join("cards.json");
        {
            let store = LocalKnowledgeStore::open(&path).await.unwrap();
            store.insert(card("a", "A").with_tier(CardTier::GlobalExpert)).await.unwrap();
            store.insert(card("b", "B")).await.unwrap();
            store.delete_card("b").await.unwrap();
        }

        let store = LocalKnowledgeStore::open(&path).await.unwrap();
        assert_eq!(store.len().await, 1);
        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.by_tier["global-expert"], 1);
    }

    #[tokio::test]
    async fn test_update_missing_card_fails() {
        let store = LocalKnowledgeStore::in_memory();
        assert!(store.update_card("nope", CardPatch::default()).await.is_err());
        assert!(store.delete_card("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_failed_save_leaves_cards_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("knowledge");
        let store = LocalKnowledgeStore::open(folder.join("cards.json")).await.unwrap();
        store.insert(card("a", "A")).await.unwrap();
        let before = store.get_card("a").await.unwrap().unwrap();

        // a plain file where the folder was makes every save fail
        std::fs::remove_dir_all(&folder).unwrap();
        std::fs::write(&folder, "").unwrap();

        let summary = UsageSummary {
            timestamp: Utc::now(),
            success: true,
            relevance: 0.9,
            effectiveness: 0.8,
        };
        let patch = CardPatch::default().tier(CardTier::GlobalExpert);
        assert!(store.update_card("a", patch).await.is_err());
        assert!(store.record_usage("a", "job-1", &summary).await.is_err());
        assert!(store.delete_card("a").await.is_err());
        assert!(store.insert(card("b", "B")).await.is_err());

        assert_eq!(store.get_card("a").await.unwrap(), Some(before));
        assert_eq!(store.len().await, 1);
    }
}
