//! Hierarchy projections over a flat list of categories.
//!
//! [CategoryIndex] is built with one pass over the input: an id lookup plus a parent to children
//! map that keeps insertion order among siblings. Everything that walks the hierarchy goes
//! through it so there is a single place where cycles are detected. A walk never visits more
//! nodes than the index holds; reaching a node twice is reported as a data integrity error. None of
//! the walks recurse, so the native stack does not grow with the depth of the hierarchy.
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::category::Category;
use crate::error::{EntityKind, Error, Result};

/// Deepest hierarchy the service accepts and the tree builder assembles. Deeper chains are
/// rejected on create and re-parent, and reported as a data integrity error when found in storage.
pub const MAX_DEPTH: usize = 32;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CategoryNode {
    #[serde(flatten)]
    pub category: Category,
    pub children: Vec<CategoryNode>,
}

impl CategoryNode {
    /// Number of nodes in this subtree, including this one.
    pub fn size(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(&node.children);
        }
        count
    }
}

pub struct CategoryIndex<'a> {
    order: Vec<&'a Category>,
    by_id: HashMap<&'a str, &'a Category>,
    children: HashMap<&'a str, Vec<&'a Category>>,
    roots: Vec<&'a Category>,
}

impl<'a> CategoryIndex<'a> {
    /// A category whose parent is not in `categories` is treated as a root, so a filtered list
    /// still produces a forest holding every input node.
    pub fn new(categories: &'a [Category]) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(categories.len());
        for category in categories {
            if by_id.insert(category.id.as_str(), category).is_some() {
                return Err(Error::integrity(
                    EntityKind::Category,
                    category.id.clone(),
                    "id appears more than once",
                ));
            }
        }

        let mut children: HashMap<&str, Vec<&Category>> = HashMap::new();
        let mut roots = Vec::new();
        for category in categories {
            match category.parent.as_deref() {
                Some(parent) if by_id.contains_key(parent) => {
                    children.entry(parent).or_default().push(category)
                }
                _ => roots.push(category),
            }
        }

        Ok(Self {
            order: categories.iter().collect(),
            by_id,
            children,
            roots,
        })
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&'a Category> {
        self.by_id.get(id).copied()
    }

    pub fn children(&self, id: &str) -> &[&'a Category] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The category and all of its descendants, depth-first.
    pub fn subtree(&self, id: &str) -> Result<Vec<&'a Category>> {
        let root = self
            .get(id)
            .ok_or_else(|| Error::not_found(EntityKind::Category, id))?;
        let mut visited = HashSet::new();
        let mut res = Vec::new();
        let mut stack = vec![root];
        while let Some(category) = stack.pop() {
            if !visited.insert(category.id.as_str()) {
                return Err(cycle_at(category));
            }
            res.push(category);
            stack.extend(self.children(&category.id).iter().rev());
        }
        Ok(res)
    }

    /// Ids of the category and all of its descendants.
    pub fn subtree_ids(&self, id: &str) -> Result<HashSet<&'a str>> {
        Ok(self
            .subtree(id)?
            .into_iter()
            .map(|c| c.id.as_str())
            .collect())
    }

    /// Assembles the whole forest, or the subtree under `root` when given.
    pub fn tree(&self, root: Option<&str>) -> Result<Vec<CategoryNode>> {
        let mut visited = HashSet::with_capacity(self.len());
        match root {
            Some(id) => {
                let category = self
                    .get(id)
                    .ok_or_else(|| Error::not_found(EntityKind::Category, id))?;
                Ok(vec![self.assemble(category, &mut visited)?])
            }
            None => {
                let mut forest = Vec::with_capacity(self.roots.len());
                for &root in &self.roots {
                    forest.push(self.assemble(root, &mut visited)?);
                }
                // Nodes that no root reaches sit on, or hang below, a parent cycle.
                if visited.len() < self.len() {
                    if let Some(stray) = self
                        .order
                        .iter()
                        .copied()
                        .find(|c| !visited.contains(c.id.as_str()))
                    {
                        return Err(cycle_at(self.find_cycle(stray)));
                    }
                }
                Ok(forest)
            }
        }
    }

    /// Builds the node for `root` with an explicit stack. Nodes are collected in pre-order, where
    /// every child sits after its parent, and then attached to their parents from the back.
    fn assemble(
        &self,
        root: &'a Category,
        visited: &mut HashSet<&'a str>,
    ) -> Result<CategoryNode> {
        let mut order: Vec<(&'a Category, Option<usize>)> = Vec::new();
        let mut stack = vec![(root, None, 1)];
        while let Some((category, parent, depth)) = stack.pop() {
            if !visited.insert(category.id.as_str()) {
                return Err(cycle_at(category));
            }
            if depth > MAX_DEPTH {
                return Err(Error::integrity(
                    EntityKind::Category,
                    category.id.clone(),
                    format!("hierarchy is deeper than {MAX_DEPTH} levels"),
                ));
            }
            let slot = order.len();
            order.push((category, parent));
            stack.extend(
                self.children(&category.id)
                    .iter()
                    .rev()
                    .map(|&child| (child, Some(slot), depth + 1)),
            );
        }

        let mut nodes: Vec<Option<CategoryNode>> = order
            .iter()
            .map(|(category, _)| {
                Some(CategoryNode {
                    category: (*category).clone(),
                    children: Vec::new(),
                })
            })
            .collect();
        // Walking backwards attaches a node only after all of its own children are in place.
        // Siblings arrive last first and are reversed when their parent is attached.
        for pos in (1..order.len()).rev() {
            let (_, parent) = order[pos];
            if let (Some(mut node), Some(parent)) = (nodes[pos].take(), parent) {
                node.children.reverse();
                if let Some(Some(parent)) = nodes.get_mut(parent) {
                    parent.children.push(node);
                }
            }
        }
        let mut node = nodes
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| Error::not_found(EntityKind::Category, root.id.clone()))?;
        node.children.reverse();
        Ok(node)
    }

    /// Levels from the top of the hierarchy down to `id`, counting `id` itself.
    pub fn depth(&self, id: &str) -> Result<usize> {
        let mut current = self
            .get(id)
            .ok_or_else(|| Error::not_found(EntityKind::Category, id))?;
        let mut depth = 1;
        while let Some(parent) = current.parent.as_deref().and_then(|p| self.get(p)) {
            depth += 1;
            if depth > self.len() {
                return Err(cycle_at(current));
            }
            current = parent;
        }
        Ok(depth)
    }

    /// Levels in the subtree under `id`, counting `id` itself.
    pub fn height(&self, id: &str) -> Result<usize> {
        let root = self
            .get(id)
            .ok_or_else(|| Error::not_found(EntityKind::Category, id))?;
        let mut visited = HashSet::new();
        let mut height = 0;
        let mut stack = vec![(root, 1)];
        while let Some((category, level)) = stack.pop() {
            if !visited.insert(category.id.as_str()) {
                return Err(cycle_at(category));
            }
            height = height.max(level);
            stack.extend(
                self.children(&category.id)
                    .iter()
                    .map(|&child| (child, level + 1)),
            );
        }
        Ok(height)
    }

    /// Follows parent pointers from `start` until one repeats and returns that node, which is on
    /// the cycle.
    fn find_cycle(&self, start: &'a Category) -> &'a Category {
        let mut seen = HashSet::new();
        let mut current = start;
        while seen.insert(current.id.as_str()) {
            match current.parent.as_deref().and_then(|p| self.get(p)) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        current
    }
}

fn cycle_at(category: &Category) -> Error {
    Error::integrity(
        EntityKind::Category,
        category.id.clone(),
        "parent chain forms a cycle",
    )
}

/// Builds the forest (or the subtree under `root`) from a flat category list.
pub fn build_tree(categories: &[Category], root: Option<&str>) -> Result<Vec<CategoryNode>> {
    CategoryIndex::new(categories)?.tree(root)
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::{build_tree, CategoryIndex, CategoryNode, MAX_DEPTH};
    use crate::category::{Category, NewCategory};
    use crate::error::Error;

    fn category(id: &str, parent: Option<&str>) -> Category {
        let mut data = NewCategory::new(format!("name-{id}"));
        data.parent = parent.map(str::to_string);
        Category::from_new(id.to_string(), data, OffsetDateTime::UNIX_EPOCH)
    }

    fn edges(nodes: &[CategoryNode], parent: Option<&str>, out: &mut Vec<(String, Option<String>)>) {
        for node in nodes {
            out.push((node.category.id.clone(), parent.map(str::to_string)));
            edges(&node.children, Some(node.category.id.as_str()), out);
        }
    }

    #[test]
    fn test_that_forest_keeps_every_node_and_edge() {
        let categories = vec![
            category("a", None),
            category("b", Some("a")),
            category("c", Some("a")),
            category("d", Some("b")),
            category("e", None),
            category("f", Some("e")),
        ];
        let forest = build_tree(&categories, None).unwrap();
        assert!(forest.len() == 2);
        assert!(forest.iter().map(CategoryNode::size).sum::<usize>() == categories.len());

        let mut found = Vec::new();
        edges(&forest, None, &mut found);
        for cat in &categories {
            assert!(found.contains(&(cat.id.clone(), cat.parent.clone())));
        }
    }

    #[test]
    fn test_that_siblings_keep_insertion_order() {
        let categories = vec![
            category("root", None),
            category("z", Some("root")),
            category("a", Some("root")),
            category("m", Some("root")),
        ];
        let forest = build_tree(&categories, None).unwrap();
        let ids: Vec<&str> = forest[0]
            .children
            .iter()
            .map(|n| n.category.id.as_str())
            .collect();
        assert!(ids == vec!["z", "a", "m"]);
    }

    #[test]
    fn test_that_cycle_is_reported_not_looped() {
        let categories = vec![
            category("root", None),
            category("a", Some("c")),
            category("b", Some("a")),
            category("c", Some("b")),
            category("below", Some("a")),
        ];
        let res = build_tree(&categories, None);
        match res {
            Err(Error::DataIntegrity { id, .. }) => assert!(["a", "b", "c"].contains(&id.as_str())),
            _ => panic!("expected data integrity error"),
        }

        let res = build_tree(&categories, Some("b"));
        assert!(matches!(res, Err(Error::DataIntegrity { .. })));
    }

    #[test]
    fn test_that_self_parent_is_a_cycle() {
        let categories = vec![category("a", Some("a"))];
        assert!(matches!(
            build_tree(&categories, None),
            Err(Error::DataIntegrity { .. })
        ));
    }

    #[test]
    fn test_that_rooted_tree_only_holds_the_subtree() {
        let categories = vec![
            category("a", None),
            category("b", Some("a")),
            category("c", Some("b")),
            category("d", None),
        ];
        let tree = build_tree(&categories, Some("b")).unwrap();
        assert!(tree.len() == 1);
        assert!(tree[0].size() == 2);

        assert!(matches!(
            build_tree(&categories, Some("missing")),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_that_orphans_become_roots() {
        let categories = vec![category("b", Some("filtered-out")), category("c", Some("b"))];
        let forest = build_tree(&categories, None).unwrap();
        assert!(forest.len() == 1);
        assert!(forest[0].size() == 2);
    }

    #[test]
    fn test_that_duplicate_ids_are_rejected() {
        let categories = vec![category("a", None), category("a", None)];
        assert!(matches!(
            CategoryIndex::new(&categories),
            Err(Error::DataIntegrity { .. })
        ));
    }

    fn chain(len: usize) -> Vec<Category> {
        (0..len)
            .map(|i| {
                let parent = if i == 0 { None } else { Some(format!("c{}", i - 1)) };
                category(&format!("c{i}"), parent.as_deref())
            })
            .collect()
    }

    #[test]
    fn test_that_chain_at_max_depth_keeps_sibling_order_and_depth() {
        let mut categories = chain(MAX_DEPTH);
        categories.push(category("x", Some("c0")));
        let forest = build_tree(&categories, None).unwrap();
        assert!(forest[0].size() == MAX_DEPTH + 1);
        let ids: Vec<&str> = forest[0]
            .children
            .iter()
            .map(|n| n.category.id.as_str())
            .collect();
        assert!(ids == vec!["c1", "x"]);

        let index = CategoryIndex::new(&categories).unwrap();
        assert!(index.depth(&format!("c{}", MAX_DEPTH - 1)).unwrap() == MAX_DEPTH);
        assert!(index.height("c0").unwrap() == MAX_DEPTH);
        assert!(index.height("x").unwrap() == 1);
    }

    #[test]
    fn test_that_deep_chain_is_an_error_not_a_crash() {
        for len in [MAX_DEPTH + 1, 3_000, 30_000] {
            let categories = chain(len);
            match build_tree(&categories, None) {
                Err(Error::DataIntegrity { id, .. }) => assert!(id == format!("c{MAX_DEPTH}")),
                _ => panic!("expected data integrity error for a chain of {len}"),
            }
            let index = CategoryIndex::new(&categories).unwrap();
            assert!(index.subtree("c0").unwrap().len() == len);
            assert!(index.height("c0").unwrap() == len);
        }
    }

    #[test]
    fn test_that_subtree_lists_node_and_descendants() {
        let categories = vec![
            category("a", None),
            category("b", Some("a")),
            category("c", Some("b")),
            category("d", None),
        ];
        let index = CategoryIndex::new(&categories).unwrap();
        let ids = index.subtree_ids("a").unwrap();
        assert!(ids.len() == 3);
        assert!(ids.contains("c"));
        assert!(!ids.contains("d"));
        assert!(!index.is_empty());
    }
}
