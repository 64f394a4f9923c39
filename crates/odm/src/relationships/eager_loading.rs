//! Eager Loading - relation trees requested with `with(...)`
//!
//! Paths such as `"posts.comments.author"` and maps such as
//! `{ "posts": ["comments", "tags"] }` are parsed once into a tree of
//! [`EagerLoad`] nodes. The tree is kept on the query builder and compiled
//! into `$lookup` stages each time a read is issued.

use serde_json::Value;

use super::metadata::RelationOptions;
use crate::error::{ModelError, ModelResult};

/// One requested relation and the relations nested under it
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EagerLoad {
    pub name: String,
    pub options: Option<RelationOptions>,
    pub children: Vec<EagerLoad>,
}

impl EagerLoad {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: None,
            children: Vec::new(),
        }
    }

    /// Find a direct child by relation name
    pub fn child(&self, name: &str) -> Option<&EagerLoad> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Number of nodes in this subtree
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(EagerLoad::node_count).sum::<usize>()
    }

    fn leaf_mut(&mut self) -> &mut EagerLoad {
        if self.children.is_empty() {
            return self;
        }
        let last = self.children.len() - 1;
        self.children[last].leaf_mut()
    }
}

/// Alias tree of compiled eager loads, used to split relation data out of
/// fetched documents
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EagerAlias {
    pub alias: String,
    pub single: bool,
    pub children: Vec<EagerAlias>,
}

fn segments(path: &str) -> ModelResult<Vec<&str>> {
    let parts: Vec<&str> = path.split('.').map(str::trim).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(ModelError::Query(format!("invalid relation path '{}'", path)));
    }
    Ok(parts)
}

/// Parse a dotted path into a single-branch tree; `options` land on the leaf
pub fn parse_path(path: &str, options: Option<RelationOptions>) -> ModelResult<EagerLoad> {
    let parts = segments(path)?;
    let mut node: Option<EagerLoad> = None;
    for (idx, part) in parts.iter().enumerate().rev() {
        let mut current = EagerLoad::new(*part);
        if idx == parts.len() - 1 {
            current.options = options.clone();
        }
        if let Some(child) = node.take() {
            current.children.push(child);
        }
        node = Some(current);
    }
    node.ok_or_else(|| ModelError::Query(format!("invalid relation path '{}'", path)))
}

/// Parse the map form `{ "relation": ["nested", "other.deeper"] }`
pub fn parse_map(spec: &Value) -> ModelResult<Vec<EagerLoad>> {
    let map = spec
        .as_object()
        .ok_or_else(|| ModelError::Query("eager-load map must be an object".to_string()))?;

    let mut tree = Vec::new();
    for (name, nested) in map {
        let mut root = parse_path(name, None)?;
        let paths: Vec<&str> = match nested {
            Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
            Value::String(path) => vec![path.as_str()],
            Value::Null => Vec::new(),
            _ => {
                return Err(ModelError::Query(format!(
                    "nested relations of '{}' must be strings",
                    name
                )))
            }
        };
        let leaf = root.leaf_mut();
        for path in paths {
            merge_into(&mut leaf.children, parse_path(path, None)?);
        }
        merge_into(&mut tree, root);
    }
    Ok(tree)
}

/// Merge a node into a sibling list, combining requests for the same relation
pub fn merge_into(tree: &mut Vec<EagerLoad>, node: EagerLoad) {
    match tree.iter_mut().find(|existing| existing.name == node.name) {
        Some(existing) => {
            if let Some(options) = node.options {
                existing.options = Some(match existing.options.take() {
                    Some(current) => current.merged_with(&options),
                    None => options,
                });
            }
            for child in node.children {
                merge_into(&mut existing.children, child);
            }
        }
        None => tree.push(node),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dotted_path_builds_a_chain() {
        let node = parse_path("posts.comments.author", None).unwrap();
        assert_eq!(node.name, "posts");
        assert_eq!(node.children[0].name, "comments");
        assert_eq!(node.children[0].children[0].name, "author");
        assert_eq!(node.node_count(), 3);
    }

    #[test]
    fn options_apply_to_leaf() {
        let options = RelationOptions::new().limit(1);
        let node = parse_path("posts.comments", Some(options.clone())).unwrap();
        assert!(node.options.is_none());
        assert_eq!(node.children[0].options, Some(options));
    }

    #[test]
    fn shared_prefixes_merge() {
        let mut tree = Vec::new();
        merge_into(&mut tree, parse_path("posts.comments", None).unwrap());
        merge_into(&mut tree, parse_path("posts.tags", None).unwrap());
        merge_into(&mut tree, parse_path("roles", None).unwrap());

        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].children.len(), 2);
    }

    #[test]
    fn map_form_nests_under_relation() {
        let tree = parse_map(&json!({ "posts": ["comments.author", "tags"] })).unwrap();
        let posts = &tree[0];
        assert!(posts.child("tags").is_some());
        assert!(posts.child("comments").and_then(|c| c.child("author")).is_some());
    }

    #[test]
    fn empty_segments_are_rejected() {
        assert!(parse_path("posts..comments", None).is_err());
        assert!(parse_path("", None).is_err());
    }
}
