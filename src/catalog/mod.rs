//! Records that point at categories: strategies, templates and the legacy template categories that
//! templates referenced before categories were unified.
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::category::CategoryId;

pub type StrategyId = String;
pub type TemplateId = String;
pub type LegacyCategoryId = String;

/// Which collection a template's `category` id points into.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum CategoryRef {
    #[default]
    TemplateCategory,
    Category,
}

impl CategoryRef {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryRef::TemplateCategory => "TemplateCategory",
            CategoryRef::Category => "Category",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TemplateCategory" => Some(CategoryRef::TemplateCategory),
            "Category" => Some(CategoryRef::Category),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub category_ref: CategoryRef,
}

impl Template {
    pub fn new(id: impl Into<TemplateId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: None,
            category_ref: CategoryRef::Category,
        }
    }

    /// Template still pointing into the legacy collection.
    pub fn legacy(
        id: impl Into<TemplateId>,
        name: impl Into<String>,
        legacy_category: impl Into<LegacyCategoryId>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: Some(legacy_category.into()),
            category_ref: CategoryRef::TemplateCategory,
        }
    }

    /// Category id this template is associated with, if it points into the unified collection.
    pub fn unified_category(&self) -> Option<&str> {
        match self.category_ref {
            CategoryRef::Category => self.category.as_deref(),
            CategoryRef::TemplateCategory => None,
        }
    }
}

/// Record of the deprecated `TemplateCategory` collection.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct LegacyCategory {
    pub id: LegacyCategoryId,
    pub name: String,
}

impl LegacyCategory {
    pub fn new(id: impl Into<LegacyCategoryId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Strategy {
    pub id: StrategyId,
    pub name: String,
    pub description: String,
    pub categories: Vec<CategoryId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Strategy {
    pub fn from_new(id: StrategyId, data: NewStrategy, now: OffsetDateTime) -> Self {
        Self {
            id,
            name: data.name,
            description: data.description,
            categories: dedup_ids(data.categories),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn in_category(&self, id: &str) -> bool {
        self.categories.iter().any(|c| c == id)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStrategy {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub categories: Vec<CategoryId>,
}

impl NewStrategy {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Drops repeated ids, first occurrence wins.
pub fn dedup_ids(ids: Vec<CategoryId>) -> Vec<CategoryId> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::{dedup_ids, CategoryRef, Template};

    #[test]
    fn test_that_template_without_ref_defaults_to_legacy_collection() {
        let template: Template = serde_json::from_str(r#"{"id": "T1", "name": "x", "category": "A1"}"#).unwrap();
        assert!(template.category_ref == CategoryRef::TemplateCategory);
        assert!(template.unified_category().is_none());

        let template: Template = serde_json::from_str(
            r#"{"id": "T1", "name": "x", "category": "c1", "categoryRef": "Category"}"#,
        )
        .unwrap();
        assert!(template.unified_category() == Some("c1"));
    }

    #[test]
    fn test_that_dedup_keeps_first_occurrence_order() {
        let ids = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        assert!(dedup_ids(ids) == vec!["b".to_string(), "a".to_string()]);
    }
}
