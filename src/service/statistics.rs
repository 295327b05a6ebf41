use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::tree::CategoryIndex;
use crate::catalog::{Strategy, Template};
use crate::category::{Category, CategoryId};
use crate::error::Result;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCount {
    pub id: CategoryId,
    pub name: String,
    pub parent: Option<CategoryId>,
    pub strategy_count: usize,
    pub template_count: usize,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryStatistics {
    pub total_categories: usize,
    /// Distinct strategies associated with at least one counted category.
    pub total_strategies: usize,
    pub total_templates: usize,
    pub average_strategies_per_category: f64,
    /// Whether per-category counts include descendants.
    pub rollup: bool,
    pub categories: Vec<CategoryCount>,
}

pub fn average_per_category(total: usize, categories: usize) -> f64 {
    if categories == 0 {
        0.0
    } else {
        total as f64 / categories as f64
    }
}

/// Counts associations per category. Associations pointing at ids outside `categories` are
/// ignored, so callers decide which categories take part (archived ones usually do not).
///
/// With `rollup` each category also counts what is associated with its descendants. A strategy
/// that sits in both a parent and its child is counted once for the parent.
pub fn compute(
    categories: &[Category],
    strategies: &[Strategy],
    templates: &[Template],
    rollup: bool,
) -> Result<CategoryStatistics> {
    let index = CategoryIndex::new(categories)?;

    let mut direct_strategies: HashMap<&str, HashSet<usize>> = HashMap::new();
    let mut associated_strategies = HashSet::new();
    for (pos, strategy) in strategies.iter().enumerate() {
        for category in &strategy.categories {
            if let Some(category) = index.get(category) {
                direct_strategies
                    .entry(category.id.as_str())
                    .or_default()
                    .insert(pos);
                associated_strategies.insert(pos);
            }
        }
    }

    let mut direct_templates: HashMap<&str, HashSet<usize>> = HashMap::new();
    let mut associated_templates = 0;
    for (pos, template) in templates.iter().enumerate() {
        if let Some(category) = template.unified_category().and_then(|id| index.get(id)) {
            direct_templates
                .entry(category.id.as_str())
                .or_default()
                .insert(pos);
            associated_templates += 1;
        }
    }

    let mut counts = Vec::with_capacity(categories.len());
    for category in categories {
        let (strategy_count, template_count) = if rollup {
            let mut rolled_strategies: HashSet<usize> = HashSet::new();
            let mut rolled_templates: HashSet<usize> = HashSet::new();
            for member in index.subtree(&category.id)? {
                if let Some(direct) = direct_strategies.get(member.id.as_str()) {
                    rolled_strategies.extend(direct.iter().copied());
                }
                if let Some(direct) = direct_templates.get(member.id.as_str()) {
                    rolled_templates.extend(direct.iter().copied());
                }
            }
            (rolled_strategies.len(), rolled_templates.len())
        } else {
            (
                direct_strategies.get(category.id.as_str()).map_or(0, HashSet::len),
                direct_templates.get(category.id.as_str()).map_or(0, HashSet::len),
            )
        };
        counts.push(CategoryCount {
            id: category.id.clone(),
            name: category.name.clone(),
            parent: category.parent.clone(),
            strategy_count,
            template_count,
        });
    }

    Ok(CategoryStatistics {
        total_categories: categories.len(),
        total_strategies: associated_strategies.len(),
        total_templates: associated_templates,
        average_strategies_per_category: average_per_category(
            associated_strategies.len(),
            categories.len(),
        ),
        rollup,
        categories: counts,
    })
}
