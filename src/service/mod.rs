//! Read projections and referential rules over a [Store].
//!
//! The service holds no state of its own besides the store handle, so read paths (listing, tree,
//! statistics) can run concurrently. Writes that need a view over several records (sibling names,
//! cycle checks on re-parenting, detaching associations after a delete) are done here; anything
//! that can be checked on a single record is left to the store.
//!
//! Store errors are passed through untouched. Nothing here turns a failed read into an empty
//! result.
use std::collections::HashSet;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::catalog::{dedup_ids, Strategy};
use crate::category::{name_key, Category, CategoryId, CategoryPatch, CategoryQuery, NewCategory};
use crate::error::{EntityKind, Error, Result};
use crate::store::Store;

pub mod filter;
pub mod statistics;
pub mod tree;

use filter::CategoryFilter;
use statistics::CategoryStatistics;
use tree::{CategoryIndex, CategoryNode, MAX_DEPTH};

/// What a delete left behind.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub id: CategoryId,
    pub detached_strategies: usize,
    pub detached_templates: usize,
}

pub struct CategoryService<S> {
    store: S,
}

impl<S: Store> CategoryService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn list_categories(&self, filter: CategoryFilter) -> Result<Vec<Category>> {
        let mut categories = self.store.query(&filter.query).await?;
        if !filter.tags.is_empty() {
            categories.retain(|c| c.has_any_tag(&filter.tags));
        }
        if let Some(under) = &filter.under {
            let all = self.store.query(&CategoryQuery::default()).await?;
            let index = CategoryIndex::new(&all)?;
            let subtree = index.subtree_ids(under)?;
            categories.retain(|c| subtree.contains(c.id.as_str()));
        }
        Ok(categories)
    }

    pub async fn get_category(&self, id: &str) -> Result<Category> {
        self.store.find_by_id(id).await
    }

    pub async fn create_category(&self, data: NewCategory) -> Result<Category> {
        self.ensure_unique_sibling(&data.name, &data.parent, None)
            .await?;
        if let Some(parent) = &data.parent {
            let all = self.store.query(&CategoryQuery::default()).await?;
            let index = CategoryIndex::new(&all)?;
            // A missing parent is reported by the store.
            if index.get(parent).is_some() && index.depth(parent)? >= MAX_DEPTH {
                return Err(Error::validation(
                    "parent",
                    format!("categories cannot be nested more than {MAX_DEPTH} levels deep"),
                ));
            }
        }
        let category = self.store.create(data).await?;
        info!("created category {} ({})", category.id, category.name);
        Ok(category)
    }

    pub async fn update_category(&self, id: &str, patch: CategoryPatch) -> Result<Category> {
        let current = self.store.find_by_id(id).await?;

        if let Some(Some(parent)) = &patch.parent {
            self.ensure_not_descendant(id, parent).await?;
        }
        if patch.name.is_some() || patch.parent.is_some() {
            let name = patch.name.as_ref().unwrap_or(&current.name);
            let parent = patch.parent.as_ref().unwrap_or(&current.parent);
            self.ensure_unique_sibling(name, parent, Some(id)).await?;
        }

        self.store.update(id, patch).await
    }

    /// Archived categories drop out of default listings, trees and statistics but keep their
    /// associations. System categories may be archived.
    pub async fn archive_category(&self, id: &str) -> Result<Category> {
        let category = self.store.update(id, CategoryPatch::archive()).await?;
        info!("archived category {}", category.id);
        Ok(category)
    }

    /// Hard delete, then detach strategies and templates that pointed at the category. The
    /// strategies and templates themselves are kept.
    pub async fn delete_category(&self, id: &str) -> Result<DeleteOutcome> {
        self.store.delete(id).await?;
        let detached_strategies = self.store.detach_strategies(id).await?;
        let detached_templates = self.store.detach_templates(id).await?;
        if detached_strategies > 0 || detached_templates > 0 {
            warn!(
                "deleted category {id}, detached {detached_strategies} strategies and {detached_templates} templates"
            );
        } else {
            info!("deleted category {id}");
        }
        Ok(DeleteOutcome {
            id: id.to_string(),
            detached_strategies,
            detached_templates,
        })
    }

    /// Forest of active categories, or the subtree under `root`.
    pub async fn category_tree(
        &self,
        root: Option<&str>,
        include_archived: bool,
    ) -> Result<Vec<CategoryNode>> {
        let query = if include_archived {
            CategoryQuery::default()
        } else {
            CategoryQuery::active()
        };
        let categories = self.store.query(&query).await?;
        if let Some(root) = root {
            // Distinguish a missing root from one that is filtered out.
            let found = self.store.find_by_id(root).await?;
            if found.archived && !include_archived {
                return Err(Error::validation(
                    "root",
                    format!("category {root} is archived"),
                ));
            }
        }
        tree::build_tree(&categories, root)
    }

    pub async fn statistics(&self, rollup: bool) -> Result<CategoryStatistics> {
        let categories = self.store.query(&CategoryQuery::active()).await?;
        let strategies = self.store.list_strategies().await?;
        let templates = self.store.list_templates().await?;
        statistics::compute(&categories, &strategies, &templates, rollup)
    }

    pub async fn strategies_by_category(
        &self,
        id: &str,
        include_descendants: bool,
    ) -> Result<Vec<Strategy>> {
        self.store.find_by_id(id).await?;
        let strategies = self.store.list_strategies().await?;
        if !include_descendants {
            return Ok(strategies.into_iter().filter(|s| s.in_category(id)).collect());
        }
        let all = self.store.query(&CategoryQuery::default()).await?;
        let index = CategoryIndex::new(&all)?;
        let subtree = index.subtree_ids(id)?;
        Ok(strategies
            .into_iter()
            .filter(|s| s.categories.iter().any(|c| subtree.contains(c.as_str())))
            .collect())
    }

    /// Replaces the strategy's categories. Every id must exist and be active.
    pub async fn assign_strategy(
        &self,
        strategy_id: &str,
        category_ids: Vec<CategoryId>,
    ) -> Result<Strategy> {
        self.store.find_strategy(strategy_id).await?;
        let category_ids = dedup_ids(category_ids);
        for id in &category_ids {
            let category = self.store.find_by_id(id).await?;
            if category.archived {
                return Err(Error::conflict(
                    EntityKind::Category,
                    id.clone(),
                    "archived categories cannot take new strategies",
                ));
            }
        }
        self.store
            .set_strategy_categories(strategy_id, category_ids)
            .await
    }

    async fn ensure_unique_sibling(
        &self,
        name: &str,
        parent: &Option<CategoryId>,
        except: Option<&str>,
    ) -> Result<()> {
        let key = name_key(name);
        let siblings = self
            .store
            .query(&CategoryQuery::children_of(parent.clone()))
            .await?;
        if let Some(clash) = siblings
            .iter()
            .find(|c| Some(c.id.as_str()) != except && name_key(&c.name) == key)
        {
            return Err(Error::conflict(
                EntityKind::Category,
                clash.id.clone(),
                format!("a sibling named {:?} already exists", clash.name),
            ));
        }
        Ok(())
    }

    /// Rejects moving `id` under itself or one of its descendants, or so deep that the moved
    /// subtree would pass [MAX_DEPTH].
    async fn ensure_not_descendant(&self, id: &str, new_parent: &str) -> Result<()> {
        if id == new_parent {
            return Err(Error::validation("parent", "category cannot be its own parent"));
        }
        let all = self.store.query(&CategoryQuery::default()).await?;
        let index = CategoryIndex::new(&all)?;
        if index.get(new_parent).is_none() {
            return Err(Error::validation(
                "parent",
                format!("parent category {new_parent} does not exist"),
            ));
        }
        let below: HashSet<&str> = index.subtree_ids(id)?;
        if below.contains(new_parent) {
            return Err(Error::validation(
                "parent",
                format!("{new_parent} is a descendant of {id}"),
            ));
        }
        if index.depth(new_parent)? + index.height(id)? > MAX_DEPTH {
            return Err(Error::validation(
                "parent",
                format!("categories cannot be nested more than {MAX_DEPTH} levels deep"),
            ));
        }
        Ok(())
    }
}
