use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use log::info;
use time::OffsetDateTime;
use tokio_postgres::types::ToSql;
use tokio_postgres::{GenericClient, NoTls, Row};

use super::{new_id, CategoryStore, StrategyStore, TemplateStore};
use crate::catalog::{dedup_ids, CategoryRef, LegacyCategory, NewStrategy, Strategy, Template};
use crate::category::{Category, CategoryPatch, CategoryQuery, NewCategory};
use crate::config::PostgresSettings;
use crate::error::{EntityKind, Error, Result};

const SCHEMA: &str = include_str!("../../sql/schema.sql");

const CATEGORY_COLUMNS: &str = "id, name, description, parent_id, tags, visibility, owner_id, \
                                is_system, archived, created_at, updated_at";
const STRATEGY_COLUMNS: &str = "id, name, description, category_ids, created_at, updated_at";
const TEMPLATE_COLUMNS: &str = "id, name, category_id, category_ref";

/// Postgres adapter over a deadpool connection pool. Each trait call checks a connection out of
/// the pool; multi-statement operations run inside a transaction.
#[derive(Clone)]
pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub async fn connect(settings: &PostgresSettings) -> Result<Self> {
        let mut config = Config::new();
        config.host = Some(settings.host.clone());
        config.port = Some(settings.port);
        config.user = Some(settings.user.clone());
        config.password = Some(settings.password.clone());
        config.dbname = Some(settings.dbname.clone());
        config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        config.pool = Some(PoolConfig::new(settings.max_size));

        let pool = config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| Error::Store(format!("could not create pool: {e}")))?;
        // Fail at startup rather than on the first request.
        drop(pool.get().await?);
        info!(
            "connected to postgres at {}:{}/{}",
            settings.host, settings.port, settings.dbname
        );
        Ok(Self::new(pool))
    }

    /// Creates the tables if they do not exist yet.
    pub async fn init_schema(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA).await?;
        info!("postgres schema ready");
        Ok(())
    }
}

fn category_from_row(row: &Row) -> Result<Category> {
    let id: String = row.try_get("id")?;
    let visibility: String = row.try_get("visibility")?;
    let visibility = visibility.parse().map_err(|_| {
        Error::integrity(
            EntityKind::Category,
            id.clone(),
            format!("unknown visibility {visibility:?}"),
        )
    })?;
    Ok(Category {
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        parent: row.try_get("parent_id")?,
        tags: row.try_get("tags")?,
        visibility,
        owner: row.try_get("owner_id")?,
        is_system: row.try_get("is_system")?,
        archived: row.try_get("archived")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        id,
    })
}

fn strategy_from_row(row: &Row) -> Result<Strategy> {
    Ok(Strategy {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        categories: row.try_get("category_ids")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn template_from_row(row: &Row) -> Result<Template> {
    let id: String = row.try_get("id")?;
    let category_ref: String = row.try_get("category_ref")?;
    let category_ref = CategoryRef::parse(&category_ref).ok_or_else(|| {
        Error::integrity(
            EntityKind::Template,
            id.clone(),
            format!("unknown category reference {category_ref:?}"),
        )
    })?;
    Ok(Template {
        name: row.try_get("name")?,
        category: row.try_get("category_id")?,
        category_ref,
        id,
    })
}

async fn category_exists<C: GenericClient>(client: &C, id: &str) -> Result<bool> {
    let row = client
        .query_opt("SELECT 1 FROM categories WHERE id = $1", &[&id])
        .await?;
    Ok(row.is_some())
}

impl CategoryStore for PostgresStore {
    async fn create(&self, mut data: NewCategory) -> Result<Category> {
        data.validate()?;
        let client = self.pool.get().await?;
        if let Some(parent) = &data.parent {
            if !category_exists(&**client, parent).await? {
                return Err(Error::validation(
                    "parent",
                    format!("parent category {parent} does not exist"),
                ));
            }
        }
        let category = Category::from_new(new_id(), data, OffsetDateTime::now_utc());
        let sql = format!(
            "INSERT INTO categories ({CATEGORY_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING {CATEGORY_COLUMNS}"
        );
        let row = client
            .query_one(
                sql.as_str(),
                &[
                    &category.id,
                    &category.name,
                    &category.description,
                    &category.parent,
                    &category.tags,
                    &category.visibility.as_str(),
                    &category.owner,
                    &category.is_system,
                    &category.archived,
                    &category.created_at,
                    &category.updated_at,
                ],
            )
            .await?;
        category_from_row(&row)
    }

    async fn find_by_id(&self, id: &str) -> Result<Category> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = $1");
        match client.query_opt(sql.as_str(), &[&id]).await? {
            Some(row) => category_from_row(&row),
            None => Err(Error::not_found(EntityKind::Category, id)),
        }
    }

    async fn query(&self, filter: &CategoryQuery) -> Result<Vec<Category>> {
        let visibility = filter.visibility.map(|v| v.as_str());

        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        match &filter.parent {
            Some(Some(parent)) => {
                params.push(parent);
                clauses.push(format!("parent_id = ${}", params.len()));
            }
            Some(None) => clauses.push("parent_id IS NULL".to_string()),
            None => {}
        }
        if let Some(visibility) = &visibility {
            params.push(visibility);
            clauses.push(format!("visibility = ${}", params.len()));
        }
        if let Some(archived) = &filter.archived {
            params.push(archived);
            clauses.push(format!("archived = ${}", params.len()));
        }
        if let Some(is_system) = &filter.is_system {
            params.push(is_system);
            clauses.push(format!("is_system = ${}", params.len()));
        }

        let mut sql = format!("SELECT {CATEGORY_COLUMNS} FROM categories");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY seq");

        let client = self.pool.get().await?;
        let rows = client.query(sql.as_str(), &params).await?;
        rows.iter().map(category_from_row).collect()
    }

    async fn update(&self, id: &str, patch: CategoryPatch) -> Result<Category> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let select = format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = $1 FOR UPDATE");
        let mut category = match tx.query_opt(select.as_str(), &[&id]).await? {
            Some(row) => category_from_row(&row)?,
            None => return Err(Error::not_found(EntityKind::Category, id)),
        };
        if let Some(Some(parent)) = &patch.parent {
            if !category_exists(&*tx, parent).await? {
                return Err(Error::validation(
                    "parent",
                    format!("parent category {parent} does not exist"),
                ));
            }
        }
        category.apply(patch, OffsetDateTime::now_utc())?;

        let sql = format!(
            "UPDATE categories SET name = $2, description = $3, parent_id = $4, tags = $5, \
             visibility = $6, owner_id = $7, archived = $8, updated_at = $9 \
             WHERE id = $1 RETURNING {CATEGORY_COLUMNS}"
        );
        let row = tx
            .query_one(
                sql.as_str(),
                &[
                    &category.id,
                    &category.name,
                    &category.description,
                    &category.parent,
                    &category.tags,
                    &category.visibility.as_str(),
                    &category.owner,
                    &category.archived,
                    &category.updated_at,
                ],
            )
            .await?;
        let updated = category_from_row(&row)?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(
                "SELECT is_system FROM categories WHERE id = $1 FOR UPDATE",
                &[&id],
            )
            .await?
            .ok_or_else(|| Error::not_found(EntityKind::Category, id))?;
        let is_system: bool = row.try_get("is_system")?;
        if is_system {
            return Err(Error::conflict(
                EntityKind::Category,
                id,
                "system categories can only be archived",
            ));
        }
        let child = tx
            .query_opt(
                "SELECT 1 FROM categories WHERE parent_id = $1 LIMIT 1",
                &[&id],
            )
            .await?;
        if child.is_some() {
            return Err(Error::conflict(
                EntityKind::Category,
                id,
                "category has children, re-parent or archive them first",
            ));
        }
        tx.execute("DELETE FROM categories WHERE id = $1", &[&id])
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

impl StrategyStore for PostgresStore {
    async fn create_strategy(&self, data: NewStrategy) -> Result<Strategy> {
        if data.name.trim().is_empty() {
            return Err(Error::validation("name", "must not be empty"));
        }
        let strategy = Strategy::from_new(new_id(), data, OffsetDateTime::now_utc());
        let client = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO strategies ({STRATEGY_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {STRATEGY_COLUMNS}"
        );
        let row = client
            .query_one(
                sql.as_str(),
                &[
                    &strategy.id,
                    &strategy.name,
                    &strategy.description,
                    &strategy.categories,
                    &strategy.created_at,
                    &strategy.updated_at,
                ],
            )
            .await?;
        strategy_from_row(&row)
    }

    async fn find_strategy(&self, id: &str) -> Result<Strategy> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {STRATEGY_COLUMNS} FROM strategies WHERE id = $1");
        match client.query_opt(sql.as_str(), &[&id]).await? {
            Some(row) => strategy_from_row(&row),
            None => Err(Error::not_found(EntityKind::Strategy, id)),
        }
    }

    async fn list_strategies(&self) -> Result<Vec<Strategy>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {STRATEGY_COLUMNS} FROM strategies ORDER BY seq");
        let rows = client.query(sql.as_str(), &[]).await?;
        rows.iter().map(strategy_from_row).collect()
    }

    async fn set_strategy_categories(&self, id: &str, categories: Vec<String>) -> Result<Strategy> {
        let categories = dedup_ids(categories);
        let now = OffsetDateTime::now_utc();
        let client = self.pool.get().await?;
        let sql = format!(
            "UPDATE strategies SET category_ids = $2, updated_at = $3 WHERE id = $1 \
             RETURNING {STRATEGY_COLUMNS}"
        );
        match client.query_opt(sql.as_str(), &[&id, &categories, &now]).await? {
            Some(row) => strategy_from_row(&row),
            None => Err(Error::not_found(EntityKind::Strategy, id)),
        }
    }

    async fn detach_strategies(&self, category: &str) -> Result<usize> {
        let client = self.pool.get().await?;
        let now = OffsetDateTime::now_utc();
        let touched = client
            .execute(
                "UPDATE strategies SET category_ids = array_remove(category_ids, $1), \
                 updated_at = $2 WHERE $1 = ANY(category_ids)",
                &[&category, &now],
            )
            .await?;
        Ok(touched as usize)
    }
}

impl TemplateStore for PostgresStore {
    async fn insert_template(&self, template: Template) -> Result<Template> {
        let client = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO templates ({TEMPLATE_COLUMNS}) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO NOTHING RETURNING {TEMPLATE_COLUMNS}"
        );
        let row = client
            .query_opt(
                sql.as_str(),
                &[
                    &template.id,
                    &template.name,
                    &template.category,
                    &template.category_ref.as_str(),
                ],
            )
            .await?;
        match row {
            Some(row) => template_from_row(&row),
            None => Err(Error::conflict(
                EntityKind::Template,
                template.id,
                "template already exists",
            )),
        }
    }

    async fn list_templates(&self) -> Result<Vec<Template>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM templates ORDER BY seq");
        let rows = client.query(sql.as_str(), &[]).await?;
        rows.iter().map(template_from_row).collect()
    }

    async fn repoint_template(&self, id: &str, category: &str) -> Result<Template> {
        let client = self.pool.get().await?;
        let sql = format!(
            "UPDATE templates SET category_id = $2, category_ref = $3 WHERE id = $1 \
             RETURNING {TEMPLATE_COLUMNS}"
        );
        let row = client
            .query_opt(sql.as_str(), &[&id, &category, &CategoryRef::Category.as_str()])
            .await?;
        match row {
            Some(row) => template_from_row(&row),
            None => Err(Error::not_found(EntityKind::Template, id)),
        }
    }

    async fn detach_templates(&self, category: &str) -> Result<usize> {
        let client = self.pool.get().await?;
        let touched = client
            .execute(
                "UPDATE templates SET category_id = NULL \
                 WHERE category_id = $1 AND category_ref = $2",
                &[&category, &CategoryRef::Category.as_str()],
            )
            .await?;
        Ok(touched as usize)
    }

    async fn insert_legacy_category(&self, legacy: LegacyCategory) -> Result<LegacyCategory> {
        let client = self.pool.get().await?;
        let touched = client
            .execute(
                "INSERT INTO template_categories (id, name) VALUES ($1, $2) \
                 ON CONFLICT (id) DO NOTHING",
                &[&legacy.id, &legacy.name],
            )
            .await?;
        if touched == 0 {
            return Err(Error::conflict(
                EntityKind::LegacyCategory,
                legacy.id,
                "legacy category already exists",
            ));
        }
        Ok(legacy)
    }

    async fn list_legacy_categories(&self) -> Result<Vec<LegacyCategory>> {
        let client = self.pool.get().await?;
        let rows = client
            .query("SELECT id, name FROM template_categories ORDER BY seq", &[])
            .await?;
        rows.iter()
            .map(|row| {
                Ok(LegacyCategory {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                })
            })
            .collect()
    }
}
