use std::sync::{Mutex, MutexGuard};

use time::OffsetDateTime;

use super::{new_id, CategoryStore, StrategyStore, TemplateStore};
use crate::catalog::{dedup_ids, CategoryRef, LegacyCategory, NewStrategy, Strategy, Template};
use crate::category::{Category, CategoryPatch, CategoryQuery, NewCategory};
use crate::error::{EntityKind, Error, Result};

#[derive(Debug, Default)]
struct Collections {
    categories: Vec<Category>,
    strategies: Vec<Strategy>,
    templates: Vec<Template>,
    legacy: Vec<LegacyCategory>,
}

impl Collections {
    fn category(&self, id: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == id)
    }

    fn category_mut(&mut self, id: &str) -> Option<&mut Category> {
        self.categories.iter_mut().find(|c| c.id == id)
    }
}

fn fresh_id(taken: impl Fn(&str) -> bool) -> String {
    loop {
        let id = new_id();
        if !taken(&id) {
            return id;
        }
    }
}

/// Vec-backed store behind a single lock. Every operation is atomic with respect to the others.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Collections>> {
        self.inner
            .lock()
            .map_err(|_| Error::Store("memory store lock poisoned".to_string()))
    }
}

impl CategoryStore for MemoryStore {
    async fn create(&self, mut data: NewCategory) -> Result<Category> {
        data.validate()?;
        let mut inner = self.lock()?;
        if let Some(parent) = &data.parent {
            if inner.category(parent).is_none() {
                return Err(Error::validation(
                    "parent",
                    format!("parent category {parent} does not exist"),
                ));
            }
        }
        let id = fresh_id(|id| inner.category(id).is_some());
        let category = Category::from_new(id, data, OffsetDateTime::now_utc());
        inner.categories.push(category.clone());
        Ok(category)
    }

    async fn find_by_id(&self, id: &str) -> Result<Category> {
        let inner = self.lock()?;
        inner
            .category(id)
            .cloned()
            .ok_or_else(|| Error::not_found(EntityKind::Category, id))
    }

    async fn query(&self, filter: &CategoryQuery) -> Result<Vec<Category>> {
        let inner = self.lock()?;
        Ok(inner
            .categories
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }

    async fn update(&self, id: &str, patch: CategoryPatch) -> Result<Category> {
        let mut inner = self.lock()?;
        if let Some(Some(parent)) = &patch.parent {
            if inner.category(parent).is_none() {
                return Err(Error::validation(
                    "parent",
                    format!("parent category {parent} does not exist"),
                ));
            }
        }
        let category = inner
            .category_mut(id)
            .ok_or_else(|| Error::not_found(EntityKind::Category, id))?;
        category.apply(patch, OffsetDateTime::now_utc())?;
        Ok(category.clone())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut inner = self.lock()?;
        let category = inner
            .category(id)
            .ok_or_else(|| Error::not_found(EntityKind::Category, id))?;
        if category.is_system {
            return Err(Error::conflict(
                EntityKind::Category,
                id,
                "system categories can only be archived",
            ));
        }
        if inner
            .categories
            .iter()
            .any(|c| c.parent.as_deref() == Some(id))
        {
            return Err(Error::conflict(
                EntityKind::Category,
                id,
                "category has children, re-parent or archive them first",
            ));
        }
        inner.categories.retain(|c| c.id != id);
        Ok(())
    }
}

impl StrategyStore for MemoryStore {
    async fn create_strategy(&self, data: NewStrategy) -> Result<Strategy> {
        if data.name.trim().is_empty() {
            return Err(Error::validation("name", "must not be empty"));
        }
        let mut inner = self.lock()?;
        let id = fresh_id(|id| inner.strategies.iter().any(|s| s.id == id));
        let strategy = Strategy::from_new(id, data, OffsetDateTime::now_utc());
        inner.strategies.push(strategy.clone());
        Ok(strategy)
    }

    async fn find_strategy(&self, id: &str) -> Result<Strategy> {
        let inner = self.lock()?;
        inner
            .strategies
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found(EntityKind::Strategy, id))
    }

    async fn list_strategies(&self) -> Result<Vec<Strategy>> {
        Ok(self.lock()?.strategies.clone())
    }

    async fn set_strategy_categories(&self, id: &str, categories: Vec<String>) -> Result<Strategy> {
        let mut inner = self.lock()?;
        let strategy = inner
            .strategies
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| Error::not_found(EntityKind::Strategy, id))?;
        strategy.categories = dedup_ids(categories);
        strategy.updated_at = OffsetDateTime::now_utc();
        Ok(strategy.clone())
    }

    async fn detach_strategies(&self, category: &str) -> Result<usize> {
        let mut inner = self.lock()?;
        let now = OffsetDateTime::now_utc();
        let mut touched = 0;
        for strategy in inner.strategies.iter_mut() {
            if strategy.in_category(category) {
                strategy.categories.retain(|c| c != category);
                strategy.updated_at = now;
                touched += 1;
            }
        }
        Ok(touched)
    }
}

impl TemplateStore for MemoryStore {
    async fn insert_template(&self, template: Template) -> Result<Template> {
        let mut inner = self.lock()?;
        if inner.templates.iter().any(|t| t.id == template.id) {
            return Err(Error::conflict(
                EntityKind::Template,
                template.id,
                "template already exists",
            ));
        }
        inner.templates.push(template.clone());
        Ok(template)
    }

    async fn list_templates(&self) -> Result<Vec<Template>> {
        Ok(self.lock()?.templates.clone())
    }

    async fn repoint_template(&self, id: &str, category: &str) -> Result<Template> {
        let mut inner = self.lock()?;
        let template = inner
            .templates
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::not_found(EntityKind::Template, id))?;
        template.category = Some(category.to_string());
        template.category_ref = CategoryRef::Category;
        Ok(template.clone())
    }

    async fn detach_templates(&self, category: &str) -> Result<usize> {
        let mut inner = self.lock()?;
        let mut touched = 0;
        for template in inner.templates.iter_mut() {
            if template.unified_category() == Some(category) {
                template.category = None;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn insert_legacy_category(&self, legacy: LegacyCategory) -> Result<LegacyCategory> {
        let mut inner = self.lock()?;
        if inner.legacy.iter().any(|l| l.id == legacy.id) {
            return Err(Error::conflict(
                EntityKind::LegacyCategory,
                legacy.id,
                "legacy category already exists",
            ));
        }
        inner.legacy.push(legacy.clone());
        Ok(legacy)
    }

    async fn list_legacy_categories(&self) -> Result<Vec<LegacyCategory>> {
        Ok(self.lock()?.legacy.clone())
    }
}
