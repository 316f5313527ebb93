//! Parameter trees
//!
//! A [`ParamTree`] is the nested name → tensor structure holding a model's
//! weights. Every file format stores the flattened form, where nested keys
//! are joined with [`PATH_SEPARATOR`].

use std::collections::BTreeMap;

use crate::error::{CoreError, Result};
use crate::tensor::Tensor;

/// Separator between nesting levels in a flat parameter name
pub const PATH_SEPARATOR: char = '.';

/// A node in the parameter tree
#[derive(Debug, Clone, PartialEq)]
pub enum ParamNode {
    Leaf(Tensor),
    Branch(ParamTree),
}

/// Nested mapping of parameter names to tensors
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamTree {
    children: BTreeMap<String, ParamNode>,
}

impl ParamTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from flat `a.b.c` names
    pub fn from_flat<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Tensor)>,
        S: AsRef<str>,
    {
        let mut tree = Self::new();
        for (name, tensor) in entries {
            tree.insert(name.as_ref(), tensor)?;
        }
        Ok(tree)
    }

    /// Insert a tensor at a flat path. Fails on duplicates and on
    /// leaf/branch conflicts (e.g. inserting `a.b` when `a.b.c` exists).
    pub fn insert(&mut self, path: &str, tensor: Tensor) -> Result<()> {
        let segments = split_path(path)?;
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| CoreError::InvalidPath(path.to_string()))?;

        let mut node = self;
        for segment in parents {
            let entry = node
                .children
                .entry((*segment).to_string())
                .or_insert_with(|| ParamNode::Branch(ParamTree::new()));
            node = match entry {
                ParamNode::Branch(tree) => tree,
                ParamNode::Leaf(_) => return Err(CoreError::PathConflict(path.to_string())),
            };
        }

        if let Some(existing) = node.children.get(*last) {
            return Err(match existing {
                ParamNode::Leaf(_) => CoreError::DuplicateParameter(path.to_string()),
                ParamNode::Branch(_) => CoreError::PathConflict(path.to_string()),
            });
        }
        node.children
            .insert((*last).to_string(), ParamNode::Leaf(tensor));
        Ok(())
    }

    /// Look up a tensor by flat path
    pub fn get(&self, path: &str) -> Option<&Tensor> {
        let segments = split_path(path).ok()?;
        let mut node = self;
        let (last, parents) = segments.split_last()?;
        for segment in parents {
            match node.children.get(*segment)? {
                ParamNode::Branch(tree) => node = tree,
                ParamNode::Leaf(_) => return None,
            }
        }
        match node.children.get(*last)? {
            ParamNode::Leaf(tensor) => Some(tensor),
            ParamNode::Branch(_) => None,
        }
    }

    /// Look up a subtree
    pub fn subtree(&self, path: &str) -> Option<&ParamTree> {
        let segments = split_path(path).ok()?;
        let mut node = self;
        for segment in segments {
            match node.children.get(segment)? {
                ParamNode::Branch(tree) => node = tree,
                ParamNode::Leaf(_) => return None,
            }
        }
        Some(node)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Direct children of this level
    pub fn children(&self) -> impl Iterator<Item = (&str, &ParamNode)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Flat `(name, tensor)` pairs in sorted name order
    pub fn iter_flat(&self) -> Vec<(String, &Tensor)> {
        let mut out = Vec::new();
        self.collect_flat("", &mut out);
        out
    }

    fn collect_flat<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Tensor)>) {
        for (key, node) in &self.children {
            let name = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}{PATH_SEPARATOR}{key}")
            };
            match node {
                ParamNode::Leaf(tensor) => out.push((name, tensor)),
                ParamNode::Branch(tree) => tree.collect_flat(&name, out),
            }
        }
    }

    /// Flatten into an owned name → tensor map
    pub fn flatten(&self) -> BTreeMap<String, Tensor> {
        self.iter_flat()
            .into_iter()
            .map(|(name, tensor)| (name, tensor.clone()))
            .collect()
    }

    /// Consume the tree into flat `(name, tensor)` pairs
    pub fn into_flat(self) -> Vec<(String, Tensor)> {
        let mut out = Vec::new();
        self.into_flat_inner(String::new(), &mut out);
        out
    }

    fn into_flat_inner(self, prefix: String, out: &mut Vec<(String, Tensor)>) {
        for (key, node) in self.children {
            let name = if prefix.is_empty() {
                key
            } else {
                format!("{prefix}{PATH_SEPARATOR}{key}")
            };
            match node {
                ParamNode::Leaf(tensor) => out.push((name, tensor)),
                ParamNode::Branch(tree) => tree.into_flat_inner(name, out),
            }
        }
    }

    /// Flat parameter names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.iter_flat().into_iter().map(|(name, _)| name).collect()
    }

    /// Number of tensors
    pub fn len(&self) -> usize {
        self.children
            .values()
            .map(|node| match node {
                ParamNode::Leaf(_) => 1,
                ParamNode::Branch(tree) => tree.len(),
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of scalar parameters
    pub fn num_parameters(&self) -> usize {
        self.iter_flat().iter().map(|(_, t)| t.numel()).sum()
    }

    /// Total serialized tensor bytes
    pub fn total_bytes(&self) -> usize {
        self.iter_flat().iter().map(|(_, t)| t.size_bytes()).sum()
    }

    /// Merge all tensors of `other` into `self`. Duplicate names are an error.
    pub fn merge(&mut self, other: ParamTree) -> Result<()> {
        for (name, tensor) in other.into_flat() {
            self.insert(&name, tensor)?;
        }
        Ok(())
    }

    /// Per-parameter sum of absolute differences against `other`.
    ///
    /// Fails if the two trees do not hold the same names and shapes.
    pub fn abs_diff_sums(&self, other: &ParamTree) -> Result<BTreeMap<String, f64>> {
        let lhs = self.iter_flat();
        let rhs = other.flatten();

        if lhs.len() != rhs.len() {
            for (name, _) in &lhs {
                if !rhs.contains_key(name) {
                    return Err(CoreError::MissingParameter(name.clone()));
                }
            }
            for name in rhs.keys() {
                if !self.contains(name) {
                    return Err(CoreError::MissingParameter(name.clone()));
                }
            }
        }

        let mut diffs = BTreeMap::new();
        for (name, tensor) in lhs {
            let theirs = rhs
                .get(&name)
                .ok_or_else(|| CoreError::MissingParameter(name.clone()))?;
            diffs.insert(name, tensor.abs_diff_sum(theirs)?);
        }
        Ok(diffs)
    }

    /// True when both trees have the same parameters and every parameter's
    /// summed absolute difference is at most `tolerance`.
    pub fn approx_eq(&self, other: &ParamTree, tolerance: f64) -> bool {
        match self.abs_diff_sums(other) {
            Ok(diffs) => diffs.values().all(|&d| d <= tolerance),
            Err(_) => false,
        }
    }
}

fn split_path(path: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = path.split(PATH_SEPARATOR).collect();
    if path.is_empty() || segments.iter().any(|s| s.is_empty()) {
        return Err(CoreError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}
