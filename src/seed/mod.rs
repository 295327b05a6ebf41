//! JSON seed documents applied at startup.
//!
//! ```json
//! {
//!   "categories": [{ "name": "Trend", "tags": ["equity"], "children": [{ "name": "Breakout" }] }],
//!   "legacyCategories": [{ "id": "A1", "name": "趋势跟踪" }],
//!   "templates": [{ "id": "T1", "name": "Donchian", "category": "A1" }],
//!   "strategies": [{ "name": "Turtle", "categories": ["Breakout"] }]
//! }
//! ```
//!
//! Seeded categories are system categories. Applying the same seed twice changes nothing: a
//! category is matched by name among its siblings, templates and legacy categories by id, and
//! strategies by name.
use std::collections::{HashMap, HashSet};
use std::path::Path;

use log::info;
use serde::Deserialize;

use crate::catalog::{LegacyCategory, NewStrategy, Template};
use crate::category::{name_key, CategoryId, CategoryQuery, NewCategory};
use crate::error::{Error, Result};
use crate::store::Store;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seed {
    #[serde(default)]
    pub categories: Vec<SeedCategory>,
    #[serde(default)]
    pub legacy_categories: Vec<LegacyCategory>,
    #[serde(default)]
    pub templates: Vec<Template>,
    #[serde(default)]
    pub strategies: Vec<SeedStrategy>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SeedCategory {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub children: Vec<SeedCategory>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SeedStrategy {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Category names.
    #[serde(default)]
    pub categories: Vec<String>,
}

/// What applying a seed added.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub categories: usize,
    pub legacy_categories: usize,
    pub templates: usize,
    pub strategies: usize,
}

impl Seed {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::validation("seed", e.to_string()))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::validation("seed", format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    pub async fn apply<S: Store>(&self, store: &S) -> Result<SeedSummary> {
        let mut summary = SeedSummary::default();

        let existing = store.query(&CategoryQuery::default()).await?;
        let mut siblings: HashMap<(Option<CategoryId>, String), CategoryId> = existing
            .iter()
            .map(|c| ((c.parent.clone(), name_key(&c.name)), c.id.clone()))
            .collect();
        let mut stack: Vec<(Option<CategoryId>, &SeedCategory)> =
            self.categories.iter().rev().map(|c| (None, c)).collect();
        while let Some((parent, seed)) = stack.pop() {
            let key = (parent.clone(), name_key(&seed.name));
            let id = match siblings.get(&key) {
                Some(id) => id.clone(),
                None => {
                    let mut data = NewCategory::new(seed.name.clone())
                        .system()
                        .with_tags(seed.tags.clone());
                    data.description = seed.description.clone();
                    data.parent = parent;
                    let created = store.create(data).await?;
                    summary.categories += 1;
                    siblings.insert(key, created.id.clone());
                    created.id
                }
            };
            stack.extend(seed.children.iter().rev().map(|c| (Some(id.clone()), c)));
        }

        let known_legacy: HashSet<String> = store
            .list_legacy_categories()
            .await?
            .into_iter()
            .map(|l| l.id)
            .collect();
        for legacy in &self.legacy_categories {
            if !known_legacy.contains(&legacy.id) {
                store.insert_legacy_category(legacy.clone()).await?;
                summary.legacy_categories += 1;
            }
        }

        let known_templates: HashSet<String> = store
            .list_templates()
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();
        for template in &self.templates {
            if !known_templates.contains(&template.id) {
                store.insert_template(template.clone()).await?;
                summary.templates += 1;
            }
        }

        let categories = store.query(&CategoryQuery::default()).await?;
        let mut by_name: HashMap<String, CategoryId> = HashMap::new();
        for category in &categories {
            by_name
                .entry(name_key(&category.name))
                .or_insert_with(|| category.id.clone());
        }
        let known_strategies: HashSet<String> = store
            .list_strategies()
            .await?
            .into_iter()
            .map(|s| name_key(&s.name))
            .collect();
        for seed in &self.strategies {
            if known_strategies.contains(&name_key(&seed.name)) {
                continue;
            }
            let mut data = NewStrategy::new(seed.name.clone());
            data.description = seed.description.clone();
            for name in &seed.categories {
                let id = by_name.get(&name_key(name)).ok_or_else(|| {
                    Error::validation(
                        "strategies",
                        format!("strategy {} names unknown category {name:?}", seed.name),
                    )
                })?;
                data.categories.push(id.clone());
            }
            store.create_strategy(data).await?;
            summary.strategies += 1;
        }

        info!(
            "seed applied: categories={} legacy={} templates={} strategies={}",
            summary.categories, summary.legacy_categories, summary.templates, summary.strategies
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::{Seed, SeedSummary};
    use crate::catalog::CategoryRef;
    use crate::category::CategoryQuery;
    use crate::error::Error;
    use crate::store::memory::MemoryStore;
    use crate::store::{CategoryStore, StrategyStore, TemplateStore};

    const SEED: &str = r#"{
        "categories": [
            {"name": "Trend", "tags": ["equity"], "children": [{"name": "Breakout"}, {"name": "Momentum"}]},
            {"name": "Carry"}
        ],
        "legacyCategories": [{"id": "A1", "name": "趋势跟踪"}],
        "templates": [{"id": "T1", "name": "Donchian", "category": "A1"}],
        "strategies": [{"name": "Turtle", "categories": ["breakout", "Carry"]}]
    }"#;

    #[tokio::test]
    async fn test_that_seed_builds_nested_system_categories() {
        let store = MemoryStore::new();
        let summary = Seed::from_json(SEED).unwrap().apply(&store).await.unwrap();
        assert!(
            summary
                == SeedSummary {
                    categories: 4,
                    legacy_categories: 1,
                    templates: 1,
                    strategies: 1,
                }
        );

        let categories = store.query(&CategoryQuery::default()).await.unwrap();
        assert!(categories.iter().all(|c| c.is_system));
        let trend = categories.iter().find(|c| c.name == "Trend").unwrap();
        let breakout = categories.iter().find(|c| c.name == "Breakout").unwrap();
        assert!(breakout.parent == Some(trend.id.clone()));
        assert!(trend.tags == vec!["equity".to_string()]);

        let strategies = store.list_strategies().await.unwrap();
        assert!(strategies[0].categories.len() == 2);
        assert!(strategies[0].in_category(&breakout.id));

        let templates = store.list_templates().await.unwrap();
        assert!(templates[0].category_ref == CategoryRef::TemplateCategory);
    }

    #[tokio::test]
    async fn test_that_applying_twice_adds_nothing() {
        let store = MemoryStore::new();
        let seed = Seed::from_json(SEED).unwrap();
        seed.apply(&store).await.unwrap();
        let summary = seed.apply(&store).await.unwrap();
        assert!(summary == SeedSummary::default());
        assert!(store.query(&CategoryQuery::default()).await.unwrap().len() == 4);
    }

    #[tokio::test]
    async fn test_that_unknown_strategy_category_is_rejected() {
        let store = MemoryStore::new();
        let seed = Seed::from_json(r#"{"strategies": [{"name": "x", "categories": ["nope"]}]}"#)
            .unwrap();
        assert!(matches!(
            seed.apply(&store).await,
            Err(Error::Validation { .. })
        ));
        assert!(Seed::from_json("{").is_err());
    }
}
