//! Decision cache.
//!
//! Evaluation is deterministic for a given rule set and fact block, so a
//! record computed once can be returned for identical inputs without
//! starting an engine.

use std::time::Duration;

use moka::future::Cache;

use tierlogic_core::{DecisionRecord, EncodedFacts, RuleSet, RuleSetId};

use crate::config::CacheConfig;

/// Cache key: rule set identity plus the SHA-256 of the encoded facts.
///
/// Name and version are not part of the key; a hit is re-labelled with the
/// requesting rule set's reference.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    rule_set: RuleSetId,
    facts: String,
}

impl CacheKey {
    pub fn new(rule_set: &RuleSet, facts: &EncodedFacts) -> Self {
        Self {
            rule_set: rule_set.id(),
            facts: facts.content_hash().to_string(),
        }
    }
}

/// Bounded, expiring store of decision records.
pub struct DecisionCache {
    cache: Cache<CacheKey, DecisionRecord>,
}

impl DecisionCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries, config.ttl)
    }

    pub async fn get(&self, key: &CacheKey) -> Option<DecisionRecord> {
        self.cache.get(key).await
    }

    pub async fn insert(&self, key: CacheKey, record: DecisionRecord) {
        self.cache.insert(key, record).await;
    }

    /// Drop every entry, e.g. after a rule set is retired.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for DecisionCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierlogic_core::{
        assemble, encode, resolve_with, ApplicantFacts, CascadeError, DecisionPredicate,
        FactSchema, Tier,
    };

    fn facts_with_score(score: i64) -> ApplicantFacts {
        let schema = FactSchema::loan_application();
        let mut record = crate::testing::scenario_record();
        record["creditScore"] = serde_json::json!(score);
        ApplicantFacts::from_json(&record, &schema).unwrap()
    }

    #[tokio::test]
    async fn test_cache_operations() {
        let cache = DecisionCache::default();
        let rules = RuleSet::loan_default().unwrap();
        let facts = facts_with_score(720);
        let key = CacheKey::new(&rules, &encode(&facts).unwrap());

        // Cache miss
        assert!(cache.get(&key).await.is_none());

        let resolution = resolve_with(|p| {
            Ok::<_, CascadeError>(p == DecisionPredicate::StandardApprove)
        })
        .unwrap();
        let record = assemble(resolution, &facts, &rules, Vec::new());
        cache.insert(key.clone(), record.clone()).await;

        // Cache hit
        let cached = cache.get(&key).await.unwrap();
        assert_eq!(cached.tier, Tier::StandardApproved);
        assert_eq!(cached, record);
    }

    #[test]
    fn test_key_separates_facts_and_rules() {
        let rules = RuleSet::loan_default().unwrap();
        let other_rules = RuleSet::new(
            "strict",
            &format!("{}\nauto_reject(A) :- loan_purpose(A, business).\n", rules.program_text()),
        )
        .unwrap();

        let a = encode(&facts_with_score(720)).unwrap();
        let b = encode(&facts_with_score(770)).unwrap();

        assert_eq!(CacheKey::new(&rules, &a), CacheKey::new(&rules, &a));
        assert_ne!(CacheKey::new(&rules, &a), CacheKey::new(&rules, &b));
        assert_ne!(CacheKey::new(&rules, &a), CacheKey::new(&other_rules, &a));
    }
}
