//! Category records and the validation rules every store applies to them.
//!
//! Categories are stored flat: each record points at its parent by id and the hierarchy is only
//! ever assembled in application code (see [crate::service::tree]). Nothing in this module knows
//! about storage, so the same rules are shared by the in-memory and the postgres adapters.
use std::collections::HashSet;
use std::str::FromStr;

use derive_more::Display;
use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;

use crate::error::{Error, Result};

pub type CategoryId = String;
pub type UserId = String;

#[derive(Clone, Copy, Debug, Default, Display, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    #[display("public")]
    Public,
    #[display("private")]
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

impl FromStr for Visibility {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            other => Err(Error::validation(
                "visibility",
                format!("expected public or private, got {other:?}"),
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub description: String,
    pub parent: Option<CategoryId>,
    pub tags: Vec<String>,
    pub visibility: Visibility,
    pub owner: Option<UserId>,
    pub is_system: bool,
    pub archived: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Category {
    pub fn from_new(id: CategoryId, data: NewCategory, now: OffsetDateTime) -> Self {
        Self {
            id,
            name: data.name.trim().to_string(),
            description: data.description,
            parent: data.parent,
            tags: data.tags,
            visibility: data.visibility,
            owner: data.owner,
            is_system: data.is_system,
            archived: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merges `patch` into the record and bumps `updated_at`. The result is validated before
    /// anything is changed so a failed patch leaves the record untouched.
    pub fn apply(&mut self, patch: CategoryPatch, now: OffsetDateTime) -> Result<()> {
        let mut next = self.clone();
        if let Some(name) = patch.name {
            next.name = name.trim().to_string();
        }
        if let Some(description) = patch.description {
            next.description = description;
        }
        if let Some(parent) = patch.parent {
            next.parent = parent;
        }
        if let Some(tags) = patch.tags {
            next.tags = normalize_tags(tags)?;
        }
        if let Some(visibility) = patch.visibility {
            next.visibility = visibility;
        }
        if let Some(owner) = patch.owner {
            next.owner = owner;
        }
        if let Some(archived) = patch.archived {
            next.archived = archived;
        }
        if next.parent.as_deref() == Some(next.id.as_str()) {
            return Err(Error::validation("parent", "category cannot be its own parent"));
        }
        validate_fields(&next.name, next.visibility, next.owner.as_deref())?;
        next.updated_at = now;
        *self = next;
        Ok(())
    }

    /// Any-of tag match.
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        self.tags.iter().any(|tag| tags.contains(tag))
    }
}

/// Key used whenever category names are compared for deduplication.
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCategory {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parent: Option<CategoryId>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub owner: Option<UserId>,
    #[serde(default)]
    pub is_system: bool,
}

impl NewCategory {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn under(mut self, parent: impl Into<CategoryId>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }

    pub fn with_tags<T: Into<String>>(mut self, tags: impl IntoIterator<Item = T>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn private_to(mut self, owner: impl Into<UserId>) -> Self {
        self.visibility = Visibility::Private;
        self.owner = Some(owner.into());
        self
    }

    /// Checks everything that can be checked without the store. Parent existence is the store's
    /// job. Tags are normalized in place.
    pub fn validate(&mut self) -> Result<()> {
        validate_fields(&self.name, self.visibility, self.owner.as_deref())?;
        self.tags = normalize_tags(std::mem::take(&mut self.tags))?;
        Ok(())
    }
}

/// Partial update. `parent` and `owner` distinguish "absent" from an explicit `null`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        default,
        deserialize_with = "explicit_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent: Option<Option<CategoryId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
    #[serde(
        default,
        deserialize_with = "explicit_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub owner: Option<Option<UserId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
}

impl CategoryPatch {
    pub fn archive() -> Self {
        Self {
            archived: Some(true),
            ..Default::default()
        }
    }

    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn reparent(parent: Option<CategoryId>) -> Self {
        Self {
            parent: Some(parent),
            ..Default::default()
        }
    }
}

fn explicit_null<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn validate_fields(name: &str, visibility: Visibility, owner: Option<&str>) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::validation("name", "must not be empty"));
    }
    if visibility == Visibility::Private && owner.map_or(true, |o| o.trim().is_empty()) {
        return Err(Error::validation(
            "owner",
            "private categories require an owner",
        ));
    }
    Ok(())
}

/// Trims tags and drops duplicates, keeping first-seen order.
pub fn normalize_tags(tags: Vec<String>) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut res = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_string();
        if tag.is_empty() {
            return Err(Error::validation("tags", "tags must not be empty"));
        }
        if seen.insert(tag.clone()) {
            res.push(tag);
        }
    }
    Ok(res)
}

/// Exact-match filter understood by every store. `None` leaves a field unconstrained, so the
/// default filter matches every stored category.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CategoryQuery {
    /// `Some(None)` selects root categories.
    pub parent: Option<Option<CategoryId>>,
    pub visibility: Option<Visibility>,
    pub archived: Option<bool>,
    pub is_system: Option<bool>,
}

impl CategoryQuery {
    pub fn active() -> Self {
        Self {
            archived: Some(false),
            ..Default::default()
        }
    }

    pub fn children_of(parent: Option<CategoryId>) -> Self {
        Self {
            parent: Some(parent),
            ..Default::default()
        }
    }

    pub fn matches(&self, category: &Category) -> bool {
        if let Some(parent) = &self.parent {
            if &category.parent != parent {
                return false;
            }
        }
        if let Some(visibility) = self.visibility {
            if category.visibility != visibility {
                return false;
            }
        }
        if let Some(archived) = self.archived {
            if category.archived != archived {
                return false;
            }
        }
        if let Some(is_system) = self.is_system {
            if category.is_system != is_system {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::{name_key, normalize_tags, Category, CategoryPatch, CategoryQuery, NewCategory};

    fn category(name: &str) -> Category {
        Category::from_new(
            "c1".to_string(),
            NewCategory::new(name),
            OffsetDateTime::UNIX_EPOCH,
        )
    }

    #[test]
    fn test_that_new_category_rejects_blank_name() {
        let mut data = NewCategory::new("   ");
        let err = data.validate().unwrap_err();
        assert!(err.field() == Some("name"));
    }

    #[test]
    fn test_that_private_category_requires_owner() {
        let mut data = NewCategory::new("Momentum");
        data.visibility = super::Visibility::Private;
        assert!(data.validate().unwrap_err().field() == Some("owner"));

        let mut data = NewCategory::new("Momentum").private_to("u1");
        assert!(data.validate().is_ok());
    }

    #[test]
    fn test_that_tags_keep_insertion_order_without_duplicates() {
        let tags = vec!["fx".to_string(), " equity ".to_string(), "fx".to_string()];
        let res = normalize_tags(tags).unwrap();
        assert!(res == vec!["fx".to_string(), "equity".to_string()]);
        assert!(normalize_tags(vec!["".to_string()]).is_err());
    }

    #[test]
    fn test_that_patch_bumps_updated_at_and_leaves_record_on_failure() {
        let mut cat = category("Trend");
        let later = OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(10);

        cat.apply(CategoryPatch::rename("Trend Following"), later)
            .unwrap();
        assert!(cat.name == "Trend Following");
        assert!(cat.updated_at == later);
        assert!(cat.created_at == OffsetDateTime::UNIX_EPOCH);

        let res = cat.apply(CategoryPatch::rename(""), later + time::Duration::seconds(1));
        assert!(res.is_err());
        assert!(cat.name == "Trend Following");
        assert!(cat.updated_at == later);
    }

    #[test]
    fn test_that_patch_rejects_self_parent() {
        let mut cat = category("Trend");
        let res = cat.apply(
            CategoryPatch::reparent(Some("c1".to_string())),
            OffsetDateTime::UNIX_EPOCH,
        );
        assert!(res.unwrap_err().field() == Some("parent"));
    }

    #[test]
    fn test_that_patch_distinguishes_missing_and_null_parent() {
        let patch: CategoryPatch = serde_json::from_str(r#"{"name": "x"}"#).unwrap();
        assert!(patch.parent.is_none());

        let patch: CategoryPatch = serde_json::from_str(r#"{"parent": null}"#).unwrap();
        assert!(patch.parent == Some(None));

        let patch: CategoryPatch = serde_json::from_str(r#"{"parent": "p1"}"#).unwrap();
        assert!(patch.parent == Some(Some("p1".to_string())));
    }

    #[test]
    fn test_that_empty_query_matches_everything() {
        let mut cat = category("Trend");
        assert!(CategoryQuery::default().matches(&cat));
        assert!(CategoryQuery::children_of(None).matches(&cat));

        cat.archived = true;
        assert!(!CategoryQuery::active().matches(&cat));
        assert!(CategoryQuery::default().matches(&cat));
    }

    #[test]
    fn test_that_name_key_only_folds_case_and_whitespace() {
        assert!(name_key(" Mean Reversion ") == name_key("mean reversion"));
        assert!(name_key("均值回归") != name_key("Mean Reversion"));
    }
}
