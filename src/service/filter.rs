use serde::{Deserialize, Serialize};

use crate::category::{CategoryId, CategoryQuery, Visibility};
use crate::error::{Error, Result};

/// Listing filter as it arrives from a query string. Every field is kept as text so that bad
/// values are reported as validation errors naming the field.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ListQuery {
    /// Parent id, or `null` for root categories.
    pub parent: Option<String>,
    pub visibility: Option<String>,
    /// `true`, `false` (the default) or `any`.
    pub archived: Option<String>,
    pub system: Option<String>,
    /// Comma separated, any-of.
    pub tags: Option<String>,
    /// Restricts the listing to this category and its descendants.
    pub under: Option<String>,
}

/// Validated listing filter. Archived categories are excluded unless asked for.
#[derive(Clone, Debug, PartialEq)]
pub struct CategoryFilter {
    pub query: CategoryQuery,
    pub tags: Vec<String>,
    pub under: Option<CategoryId>,
}

impl Default for CategoryFilter {
    fn default() -> Self {
        Self {
            query: CategoryQuery::active(),
            tags: Vec::new(),
            under: None,
        }
    }
}

fn parse_bool(field: &str, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(Error::validation(
            field,
            format!("expected true or false, got {other:?}"),
        )),
    }
}

fn non_empty(field: &str, value: String) -> Result<String> {
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(Error::validation(field, "must not be empty"));
    }
    Ok(value)
}

impl TryFrom<ListQuery> for CategoryFilter {
    type Error = Error;

    fn try_from(raw: ListQuery) -> Result<Self> {
        let mut filter = CategoryFilter::default();

        if let Some(parent) = raw.parent {
            let parent = non_empty("parent", parent)?;
            filter.query.parent = Some(if parent == "null" { None } else { Some(parent) });
        }
        if let Some(visibility) = raw.visibility {
            filter.query.visibility = Some(visibility.parse::<Visibility>()?);
        }
        if let Some(archived) = raw.archived {
            filter.query.archived = match archived.as_str() {
                "any" => None,
                other => Some(parse_bool("archived", other)?),
            };
        }
        if let Some(system) = raw.system {
            filter.query.is_system = Some(parse_bool("system", &system)?);
        }
        if let Some(tags) = raw.tags {
            filter.tags = tags
                .split(',')
                .map(|tag| non_empty("tags", tag.to_string()))
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(under) = raw.under {
            filter.under = Some(non_empty("under", under)?);
        }
        Ok(filter)
    }
}
