//! Storage interface for categories and the records that reference them.
//!
//! There are two adapters: [MemoryStore](crate::store::memory::MemoryStore) for development and
//! tests, and [PostgresStore](crate::store::postgres::PostgresStore) for persistent deployments.
//! Which one runs is decided once at startup from configuration and the handle is then passed to
//! the service and the migration; business logic never branches on the backend.
//!
//! Stores enforce record-level rules: non-empty names, existing parents, the delete policy for
//! system and non-leaf categories. Rules that need a view over many records (cycles, sibling
//! names) live in [CategoryService](crate::service::CategoryService).
use std::future::Future;

use crate::catalog::{LegacyCategory, NewStrategy, Strategy, Template};
use crate::category::{Category, CategoryPatch, CategoryQuery, NewCategory};
use crate::error::Result;

pub mod memory;
pub mod postgres;

pub trait CategoryStore {
    /// Fails with a validation error if the name is empty or the parent does not exist.
    fn create(&self, data: NewCategory) -> impl Future<Output = Result<Category>>;
    fn find_by_id(&self, id: &str) -> impl Future<Output = Result<Category>>;
    /// Categories matching `filter`, in insertion order. The returned collection is owned by the
    /// caller and can be walked any number of times.
    fn query(&self, filter: &CategoryQuery) -> impl Future<Output = Result<Vec<Category>>>;
    fn update(&self, id: &str, patch: CategoryPatch) -> impl Future<Output = Result<Category>>;
    /// Hard delete. Fails with a conflict for system categories and categories with children.
    fn delete(&self, id: &str) -> impl Future<Output = Result<()>>;
}

pub trait StrategyStore {
    fn create_strategy(&self, data: NewStrategy) -> impl Future<Output = Result<Strategy>>;
    fn find_strategy(&self, id: &str) -> impl Future<Output = Result<Strategy>>;
    fn list_strategies(&self) -> impl Future<Output = Result<Vec<Strategy>>>;
    /// Replaces the strategy's category list.
    fn set_strategy_categories(
        &self,
        id: &str,
        categories: Vec<String>,
    ) -> impl Future<Output = Result<Strategy>>;
    /// Removes `category` from every strategy, returning how many were touched.
    fn detach_strategies(&self, category: &str) -> impl Future<Output = Result<usize>>;
}

pub trait TemplateStore {
    /// Fails with a conflict if a template with the same id exists.
    fn insert_template(&self, template: Template) -> impl Future<Output = Result<Template>>;
    fn list_templates(&self) -> impl Future<Output = Result<Vec<Template>>>;
    /// Points the template at a unified category.
    fn repoint_template(&self, id: &str, category: &str) -> impl Future<Output = Result<Template>>;
    /// Clears `category` on every template associated with it, returning how many were touched.
    fn detach_templates(&self, category: &str) -> impl Future<Output = Result<usize>>;
    fn insert_legacy_category(
        &self,
        legacy: LegacyCategory,
    ) -> impl Future<Output = Result<LegacyCategory>>;
    fn list_legacy_categories(&self) -> impl Future<Output = Result<Vec<LegacyCategory>>>;
}

/// Everything the service and the migration need from a backend.
pub trait Store: CategoryStore + StrategyStore + TemplateStore {}

impl<T: CategoryStore + StrategyStore + TemplateStore> Store for T {}

/// Opaque 64-bit random id rendered as hex.
pub fn new_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}
