//! Binary decision trees shared by the forest, the boosted ensemble and
//! the isolation forest, plus exact path-dependent TreeSHAP.
//!
//! Nodes live in a flat Vec with the root at index 0. A sample goes left
//! when `x[feature] <= threshold`. Every node records its cover (the
//! training weight that reached it), which TreeSHAP needs to weigh the
//! branch a feature's absence would take.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        cover: f64,
    },
    Leaf {
        value: f64,
        cover: f64,
    },
}

impl Node {
    pub fn cover(&self) -> f64 {
        match self {
            Node::Split { cover, .. } | Node::Leaf { cover, .. } => *cover,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Append a node and return its index.
    pub fn push(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Overwrite a placeholder once its children are known.
    pub fn set(&mut self, index: usize, node: Node) {
        self.nodes[index] = node;
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Index of the leaf `row` lands in, and the number of edges walked.
    pub fn leaf_index(&self, row: &[f64]) -> (usize, usize) {
        let mut idx = 0;
        let mut depth = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { .. } => return (idx, depth),
                Node::Split { feature, threshold, left, right, .. } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                    depth += 1;
                }
            }
        }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        match &self.nodes[self.leaf_index(row).0] {
            Node::Leaf { value, .. } => *value,
            Node::Split { .. } => unreachable!("leaf_index always stops on a leaf"),
        }
    }

    /// Cover-weighted mean of the leaf values: the tree's output when no
    /// feature is known.
    pub fn expected_value(&self) -> f64 {
        let root_cover = self.nodes.first().map(Node::cover).unwrap_or(0.0);
        if root_cover <= 0.0 {
            return 0.0;
        }
        self.nodes
            .iter()
            .filter_map(|n| match n {
                Node::Leaf { value, cover } => Some(value * cover),
                Node::Split { .. } => None,
            })
            .sum::<f64>()
            / root_cover
    }

    /// Add this tree's exact Shapley values for `row` into `phi`.
    ///
    /// `sum(phi) + expected_value() == predict(row)` up to rounding.
    pub fn shap_into(&self, row: &[f64], phi: &mut [f64]) {
        if self.nodes.is_empty() {
            return;
        }
        self.shap_recurse(0, row, phi, &[], 1.0, 1.0, None);
    }

    #[allow(clippy::too_many_arguments)]
    fn shap_recurse(
        &self,
        node: usize,
        row: &[f64],
        phi: &mut [f64],
        parent_path: &[PathElement],
        zero_fraction: f64,
        one_fraction: f64,
        feature: Option<usize>,
    ) {
        let mut path = parent_path.to_vec();
        extend_path(&mut path, zero_fraction, one_fraction, feature);

        match &self.nodes[node] {
            Node::Leaf { value, .. } => {
                for i in 1..path.len() {
                    let w = unwound_path_sum(&path, i);
                    let el = path[i];
                    if let Some(f) = el.feature {
                        phi[f] += w * (el.one_fraction - el.zero_fraction) * value;
                    }
                }
            }
            Node::Split { feature: split, threshold, left, right, cover } => {
                let (hot, cold) = if row[*split] <= *threshold {
                    (*left, *right)
                } else {
                    (*right, *left)
                };
                let hot_zero = safe_div(self.nodes[hot].cover(), *cover);
                let cold_zero = safe_div(self.nodes[cold].cover(), *cover);

                let mut incoming_zero = 1.0;
                let mut incoming_one = 1.0;
                if let Some(k) = path.iter().position(|e| e.feature == Some(*split)) {
                    incoming_zero = path[k].zero_fraction;
                    incoming_one = path[k].one_fraction;
                    unwind_path(&mut path, k);
                }

                self.shap_recurse(hot, row, phi, &path, hot_zero * incoming_zero, incoming_one, Some(*split));
                self.shap_recurse(cold, row, phi, &path, cold_zero * incoming_zero, 0.0, Some(*split));
            }
        }
    }
}

/// A set of trees whose outputs combine as `base + weight * sum(tree)`.
/// A forest averages (`weight = 1/n`), a boosted ensemble sums margins.
#[derive(Debug, Clone, Copy)]
pub struct TreeEnsemble<'a> {
    pub trees: &'a [Tree],
    pub tree_weight: f64,
    pub base: f64,
}

impl TreeEnsemble<'_> {
    pub fn predict(&self, row: &[f64]) -> f64 {
        self.base + self.tree_weight * self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }

    pub fn expected_value(&self) -> f64 {
        self.base + self.tree_weight * self.trees.iter().map(Tree::expected_value).sum::<f64>()
    }

    pub fn shap_values(&self, row: &[f64], n_features: usize) -> Vec<f64> {
        let mut phi = vec![0.0; n_features];
        for tree in self.trees {
            tree.shap_into(row, &mut phi);
        }
        for v in &mut phi {
            *v *= self.tree_weight;
        }
        phi
    }
}

// ── TreeSHAP path bookkeeping ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    weight: f64,
}

fn safe_div(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        0.0
    } else {
        a / b
    }
}

fn extend_path(path: &mut Vec<PathElement>, zero_fraction: f64, one_fraction: f64, feature: Option<usize>) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        weight: if depth == 0 { 1.0 } else { 0.0 },
    });
    let d1 = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].weight += one_fraction * path[i].weight * (i + 1) as f64 / d1;
        path[i].weight = zero_fraction * path[i].weight * (depth - i) as f64 / d1;
    }
}

fn unwind_path(path: &mut Vec<PathElement>, index: usize) {
    let depth = path.len() - 1;
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let d1 = (depth + 1) as f64;
    let mut next_one = path[depth].weight;

    for i in (0..depth).rev() {
        if one != 0.0 {
            let tmp = path[i].weight;
            path[i].weight = next_one * d1 / ((i + 1) as f64 * one);
            next_one = tmp - path[i].weight * zero * (depth - i) as f64 / d1;
        } else {
            path[i].weight = path[i].weight * d1 / (zero * (depth - i) as f64);
        }
    }
    for i in index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.pop();
}

fn unwound_path_sum(path: &[PathElement], index: usize) -> f64 {
    let depth = path.len() - 1;
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let d1 = (depth + 1) as f64;
    let mut next_one = path[depth].weight;
    let mut total = 0.0;

    for i in (0..depth).rev() {
        if one != 0.0 {
            let tmp = next_one * d1 / ((i + 1) as f64 * one);
            total += tmp;
            next_one = path[i].weight - tmp * zero * (depth - i) as f64 / d1;
        } else if zero != 0.0 {
            total += path[i].weight / zero / ((depth - i) as f64 / d1);
        }
    }
    total
}
