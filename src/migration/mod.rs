//! One-shot unification of legacy template categories into the category collection.
//!
//! Every template that still points into the legacy collection is repointed at the category with
//! the same name, which is created (as a public system category) when it does not exist yet.
//! References to legacy categories that no longer exist go to a default category instead. Names
//! are compared case-insensitively after trimming, so re-running the migration finds the
//! categories created by an earlier run and creates nothing new.
//!
//! The run is not transactional. A store failure aborts it and leaves already repointed templates
//! in place; running it again completes the job. It must not run concurrently with itself or with
//! admin writes to the same collections.
use std::collections::HashMap;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::catalog::{CategoryRef, LegacyCategory, Template};
use crate::category::{name_key, Category, CategoryId, CategoryQuery, NewCategory};
use crate::error::Result;
use crate::store::Store;

/// Name of the category that dangling legacy references are moved to.
pub const DEFAULT_CATEGORY_NAME: &str = "未分类";

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub migrated: usize,
    pub skipped: usize,
    pub invalid: usize,
    pub success: bool,
    /// Categories created by this run, including the default category.
    pub created_categories: usize,
    /// Templates whose legacy category did not exist. Also counted in `migrated`.
    pub dangling_references: usize,
}

impl MigrationReport {
    fn finish(mut self, invalid: usize) -> Self {
        self.invalid = invalid;
        self.success = invalid == 0;
        self
    }
}

/// Name to category lookup. The first category seen for a name wins, archived ones included, so
/// an archived category is reused rather than shadowed by a new one.
struct NameIndex {
    by_name: HashMap<String, CategoryId>,
}

impl NameIndex {
    fn new(categories: &[Category]) -> Self {
        let mut by_name = HashMap::with_capacity(categories.len());
        for category in categories {
            by_name
                .entry(name_key(&category.name))
                .or_insert_with(|| category.id.clone());
        }
        Self { by_name }
    }

    fn get(&self, name: &str) -> Option<&CategoryId> {
        self.by_name.get(&name_key(name))
    }

    fn insert(&mut self, category: &Category) {
        self.by_name
            .insert(name_key(&category.name), category.id.clone());
    }
}

pub struct Migration<'a, S> {
    store: &'a S,
    default_category: String,
}

impl<'a, S: Store> Migration<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            default_category: DEFAULT_CATEGORY_NAME.to_string(),
        }
    }

    pub fn with_default_category(mut self, name: impl Into<String>) -> Self {
        self.default_category = name.into();
        self
    }

    pub async fn run(&self) -> Result<MigrationReport> {
        let templates = self.store.list_templates().await?;
        let legacy: HashMap<String, LegacyCategory> = self
            .store
            .list_legacy_categories()
            .await?
            .into_iter()
            .map(|l| (l.id.clone(), l))
            .collect();
        let categories = self.store.query(&CategoryQuery::default()).await?;
        let mut names = NameIndex::new(&categories);

        let mut report = MigrationReport::default();
        for template in &templates {
            let Some(reference) = template.category.as_deref() else {
                debug!("template {} has no category, skipping", template.id);
                report.skipped += 1;
                continue;
            };
            if template.category_ref == CategoryRef::Category {
                debug!("template {} already migrated", template.id);
                report.skipped += 1;
                continue;
            }

            let name = match legacy.get(reference) {
                Some(found) if !found.name.trim().is_empty() => found.name.as_str(),
                found => {
                    if found.is_none() {
                        warn!(
                            "template {} references missing legacy category {}, moving it to {}",
                            template.id, reference, self.default_category
                        );
                    } else {
                        warn!(
                            "legacy category {} has a blank name, moving template {} to {}",
                            reference, template.id, self.default_category
                        );
                    }
                    report.dangling_references += 1;
                    self.default_category.as_str()
                }
            };

            let target = self.find_or_create(name, &mut names, &mut report).await?;
            self.store.repoint_template(&template.id, &target).await?;
            debug!("template {} now in category {}", template.id, target);
            report.migrated += 1;
        }

        let invalid = self.count_invalid().await?;
        let report = report.finish(invalid);
        info!(
            "migration finished: migrated={} skipped={} invalid={} created={} dangling={}",
            report.migrated,
            report.skipped,
            report.invalid,
            report.created_categories,
            report.dangling_references
        );
        Ok(report)
    }

    /// Checks the current state without changing anything. Only `invalid` and `success` are set.
    pub async fn verify(&self) -> Result<MigrationReport> {
        let invalid = self.count_invalid().await?;
        info!("verification finished: invalid={invalid}");
        Ok(MigrationReport::default().finish(invalid))
    }

    async fn find_or_create(
        &self,
        name: &str,
        names: &mut NameIndex,
        report: &mut MigrationReport,
    ) -> Result<CategoryId> {
        if let Some(id) = names.get(name) {
            return Ok(id.clone());
        }
        let category = self.store.create(NewCategory::new(name).system()).await?;
        info!("created category {} ({})", category.id, category.name);
        names.insert(&category);
        report.created_categories += 1;
        Ok(category.id)
    }

    /// Templates that still point into the legacy collection or at a category that does not
    /// exist. Templates without a category are never invalid.
    async fn count_invalid(&self) -> Result<usize> {
        let templates = self.store.list_templates().await?;
        let categories = self.store.query(&CategoryQuery::default()).await?;
        let known: std::collections::HashSet<&str> =
            categories.iter().map(|c| c.id.as_str()).collect();

        let invalid = templates
            .iter()
            .filter(|t| !template_is_valid(t, |id| known.contains(id)))
            .inspect(|t| warn!("template {} has an invalid category reference", t.id))
            .count();
        Ok(invalid)
    }
}

fn template_is_valid(template: &Template, exists: impl Fn(&str) -> bool) -> bool {
    match (&template.category, template.category_ref) {
        (None, _) => true,
        (Some(id), CategoryRef::Category) => exists(id),
        (Some(_), CategoryRef::TemplateCategory) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{Migration, MigrationReport, DEFAULT_CATEGORY_NAME};
    use crate::catalog::{CategoryRef, LegacyCategory, Template};
    use crate::category::{CategoryQuery, NewCategory};
    use crate::store::memory::MemoryStore;
    use crate::store::{CategoryStore, TemplateStore};

    async fn legacy_store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_legacy_category(LegacyCategory::new("A1", "趋势跟踪"))
            .await
            .unwrap();
        store
            .insert_template(Template::legacy("T1", "Trend template", "A1"))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_that_legacy_reference_is_repointed_to_new_system_category() {
        let store = legacy_store().await;
        let report = Migration::new(&store).run().await.unwrap();
        assert!(report.migrated == 1);
        assert!(report.skipped == 0);
        assert!(report.invalid == 0);
        assert!(report.success);
        assert!(report.created_categories == 1);

        let categories = store.query(&CategoryQuery::default()).await.unwrap();
        assert!(categories.len() == 1);
        assert!(categories[0].name == "趋势跟踪");
        assert!(categories[0].is_system);

        let templates = store.list_templates().await.unwrap();
        assert!(templates[0].category == Some(categories[0].id.clone()));
        assert!(templates[0].category_ref == CategoryRef::Category);
    }

    #[tokio::test]
    async fn test_that_second_run_creates_nothing() {
        let store = legacy_store().await;
        store
            .insert_template(Template::legacy("T3", "Another", "A1"))
            .await
            .unwrap();
        let first = Migration::new(&store).run().await.unwrap();
        assert!(first.migrated == 2 && first.created_categories == 1);
        let mapping = store.list_templates().await.unwrap();

        let second = Migration::new(&store).run().await.unwrap();
        assert!(second.migrated == 0);
        assert!(second.skipped == 2);
        assert!(second.created_categories == 0);
        assert!(second.invalid == 0);
        assert!(store.list_templates().await.unwrap() == mapping);
        assert!(store.query(&CategoryQuery::default()).await.unwrap().len() == 1);
    }

    #[tokio::test]
    async fn test_that_dangling_reference_goes_to_default_category() {
        let store = MemoryStore::new();
        store
            .insert_template(Template::legacy("T1", "Orphan", "gone"))
            .await
            .unwrap();
        store
            .insert_template(Template::legacy("T2", "Orphan too", "also-gone"))
            .await
            .unwrap();

        let report = Migration::new(&store).run().await.unwrap();
        assert!(report.migrated == 2);
        assert!(report.skipped == 0);
        assert!(report.dangling_references == 2);
        assert!(report.created_categories == 1);

        let categories = store.query(&CategoryQuery::default()).await.unwrap();
        assert!(categories.len() == 1);
        assert!(categories[0].name == DEFAULT_CATEGORY_NAME);
    }

    #[tokio::test]
    async fn test_that_null_category_is_skipped_never_invalid() {
        let store = MemoryStore::new();
        let mut template = Template::legacy("T2", "Blank", "x");
        template.category = None;
        store.insert_template(template).await.unwrap();

        let report = Migration::new(&store).run().await.unwrap();
        assert!(
            report
                == MigrationReport {
                    skipped: 1,
                    success: true,
                    ..Default::default()
                }
        );
    }

    #[tokio::test]
    async fn test_that_names_match_ignoring_case_only() {
        let store = MemoryStore::new();
        let existing = store
            .create(NewCategory::new("Mean Reversion"))
            .await
            .unwrap();
        store
            .insert_legacy_category(LegacyCategory::new("L1", "mean reversion"))
            .await
            .unwrap();
        store
            .insert_legacy_category(LegacyCategory::new("L2", "Mean-Reversion"))
            .await
            .unwrap();
        store
            .insert_template(Template::legacy("T1", "a", "L1"))
            .await
            .unwrap();
        store
            .insert_template(Template::legacy("T2", "b", "L2"))
            .await
            .unwrap();

        let report = Migration::new(&store).run().await.unwrap();
        assert!(report.migrated == 2);
        assert!(report.created_categories == 1);

        let templates = store.list_templates().await.unwrap();
        assert!(templates[0].category == Some(existing.id.clone()));
        assert!(templates[1].category != Some(existing.id));
    }

    #[tokio::test]
    async fn test_that_verify_flags_unmigrated_and_missing_targets() {
        let store = legacy_store().await;
        let mut broken = Template::new("T9", "Broken");
        broken.category = Some("missing".to_string());
        store.insert_template(broken).await.unwrap();

        let report = Migration::new(&store).verify().await.unwrap();
        assert!(report.invalid == 2);
        assert!(!report.success);

        let report = Migration::new(&store)
            .with_default_category("Uncategorised")
            .run()
            .await
            .unwrap();
        assert!(report.migrated == 1);
        assert!(report.skipped == 1);
        assert!(report.invalid == 1);
        assert!(!report.success);
    }
}
