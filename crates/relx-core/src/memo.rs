//! # Memo
//!
//! The memo is the search state of one optimization: an arena of equivalence classes
//! (groups) and the expressions that belong to them. Expressions reference their
//! inputs by group id, so every alternative of a child group is available to every
//! parent without copying subtrees.
//!
//! ## Expressions
//!
//! A [`MemoExpr`] is an operator in a calling convention plus its child groups and the
//! convention it requires of each child. Logical expressions live in `NONE` and require
//! `NONE` of their children. Two expressions are structurally equal when operator,
//! convention, child groups and required input conventions all match; the memo keeps
//! one copy and absorbs every later proposal into it.
//!
//! ## Group Merging
//!
//! When a proposal added to group `A` duplicates an expression that already lives in
//! group `B`, the two groups describe the same relation and are merged. Merging is a
//! union-find over group ids: the higher id is redirected to the lower one, its
//! expressions and requirements move over, and the structural index is rebuilt because
//! child ids of other expressions may now be stale. Rebuilding can expose further
//! duplicates, which cascade into further merges.
//!
//! ## Winners
//!
//! Each group records, per convention, the cheapest expression found so far. Winners
//! are maintained by the search; the memo only stores them and extracts the winning
//! tree into a [`PhysicalPlan`].

use crate::convention::Convention;
use crate::cost::Cost;
use crate::error::OptimizationError;
use crate::expr::{Operator, RowType};
use crate::stats::Statistics;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt::Write;
use tracing::debug;

pub type GroupId = u32;
pub type ExprId = u32;

/// An expression in the memo.
#[derive(Debug, Clone)]
pub struct MemoExpr {
    pub id: ExprId,
    /// Owning group. Always canonical; updated when groups merge.
    pub group: GroupId,
    pub op: Operator,
    pub convention: Convention,
    pub children: Vec<GroupId>,
    /// Convention required of each child, parallel to `children`.
    pub input_conventions: Vec<Convention>,
}

impl MemoExpr {
    pub fn is_logical(&self) -> bool {
        self.convention.is_none()
    }

    fn key(&self) -> ExprKey {
        (
            self.op.clone(),
            self.convention,
            self.children.clone(),
            self.input_conventions.clone(),
        )
    }
}

/// Best known expression of a group in one convention.
#[derive(Debug, Clone, Copy)]
pub struct Winner {
    pub expr_id: ExprId,
    pub cost: Cost,
}

/// An equivalence class of expressions producing the same rows.
#[derive(Debug, Clone)]
pub struct Group {
    pub id: GroupId,
    /// Member expressions in insertion order.
    pub exprs: Vec<ExprId>,
    pub row_type: RowType,
    /// Conventions some consumer needs from this group, in the order first requested.
    pub required: Vec<Convention>,
    pub winners: HashMap<Convention, Winner>,
    pub stats: Option<Statistics>,
}

impl Group {
    /// Record a required convention. Returns false if it was already known.
    pub fn require(&mut self, convention: Convention) -> bool {
        if self.required.contains(&convention) {
            return false;
        }
        self.required.push(convention);
        true
    }
}

type ExprKey = (Operator, Convention, Vec<GroupId>, Vec<Convention>);

/// Arena of groups and expressions for a single optimization.
#[derive(Debug, Default)]
pub struct Memo {
    groups: Vec<Group>,
    exprs: Vec<MemoExpr>,
    /// Union-find parent pointers; `parent[g] == g` for live groups.
    parent: Vec<GroupId>,
    index: HashMap<ExprKey, ExprId>,
    applied: HashSet<(ExprId, u64)>,
    merges: usize,
}

impl Memo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical id of a group.
    pub fn find(&self, mut group: GroupId) -> GroupId {
        while self.parent[group as usize] != group {
            group = self.parent[group as usize];
        }
        group
    }

    pub fn group(&self, group: GroupId) -> &Group {
        &self.groups[self.find(group) as usize]
    }

    pub fn group_mut(&mut self, group: GroupId) -> &mut Group {
        let id = self.find(group);
        &mut self.groups[id as usize]
    }

    pub fn expr(&self, expr: ExprId) -> &MemoExpr {
        &self.exprs[expr as usize]
    }

    /// Ids of all live (canonical) groups in creation order.
    pub fn group_ids(&self) -> Vec<GroupId> {
        (0..self.groups.len() as GroupId)
            .filter(|&g| self.parent[g as usize] == g)
            .collect()
    }

    pub fn num_groups(&self) -> usize {
        self.parent
            .iter()
            .enumerate()
            .filter(|(g, p)| *g as GroupId == **p)
            .count()
    }

    pub fn num_exprs(&self) -> usize {
        self.exprs.len()
    }

    /// Number of group merges performed so far.
    pub fn merges(&self) -> usize {
        self.merges
    }

    /// Add a logical expression, creating a group unless an equal one exists.
    pub fn add_logical(
        &mut self,
        op: Operator,
        children: Vec<GroupId>,
    ) -> Result<GroupId, OptimizationError> {
        let inputs = vec![Convention::NONE; children.len()];
        self.add_expr(op, Convention::NONE, children, inputs)
            .map(|(group, _)| group)
    }

    /// Add an expression in its own new group. If a structurally equal expression
    /// already exists its group and id are returned instead.
    pub fn add_expr(
        &mut self,
        op: Operator,
        convention: Convention,
        children: Vec<GroupId>,
        input_conventions: Vec<Convention>,
    ) -> Result<(GroupId, ExprId), OptimizationError> {
        let children: Vec<GroupId> = children.iter().map(|&c| self.find(c)).collect();
        let key = (op, convention, children, input_conventions);
        if let Some(&existing) = self.index.get(&key) {
            return Ok((self.exprs[existing as usize].group, existing));
        }
        let row_type = self.derive_row_type(&key.0, &key.2, &key.3)?;
        let group = self.groups.len() as GroupId;
        self.groups.push(Group {
            id: group,
            exprs: Vec::new(),
            row_type,
            required: Vec::new(),
            winners: HashMap::new(),
            stats: None,
        });
        self.parent.push(group);
        let expr = self.push_expr(group, key);
        Ok((group, expr))
    }

    /// Add an expression to an existing group.
    ///
    /// A duplicate of an expression in another group merges the two groups. A new
    /// expression whose derived row type differs from the group's is rejected with
    /// `RowTypeMismatch`, attributed to `origin`.
    pub fn add_expr_to_group(
        &mut self,
        group: GroupId,
        op: Operator,
        convention: Convention,
        children: Vec<GroupId>,
        input_conventions: Vec<Convention>,
        origin: &str,
    ) -> Result<ExprId, OptimizationError> {
        let group = self.find(group);
        let children: Vec<GroupId> = children.iter().map(|&c| self.find(c)).collect();
        let key = (op, convention, children, input_conventions);
        if let Some(&existing) = self.index.get(&key) {
            let owner = self.exprs[existing as usize].group;
            if owner != group {
                self.merge(owner, group, origin)?;
            }
            return Ok(existing);
        }
        let actual = self.derive_row_type(&key.0, &key.2, &key.3)?;
        let expected = &self.groups[group as usize].row_type;
        if actual != *expected {
            return Err(OptimizationError::RowTypeMismatch {
                rule: origin.to_string(),
                expected: expected.clone(),
                actual,
            });
        }
        Ok(self.push_expr(group, key))
    }

    fn push_expr(&mut self, group: GroupId, key: ExprKey) -> ExprId {
        let id = self.exprs.len() as ExprId;
        let (op, convention, children, input_conventions) = key.clone();
        self.exprs.push(MemoExpr {
            id,
            group,
            op,
            convention,
            children,
            input_conventions,
        });
        self.index.insert(key, id);
        self.groups[group as usize].exprs.push(id);
        id
    }

    fn derive_row_type(
        &self,
        op: &Operator,
        children: &[GroupId],
        input_conventions: &[Convention],
    ) -> Result<RowType, OptimizationError> {
        if input_conventions.len() != children.len() {
            return Err(OptimizationError::InvalidExpression {
                kind: op.kind(),
                expected: children.len(),
                actual: input_conventions.len(),
            });
        }
        let inputs: Vec<&RowType> = children
            .iter()
            .map(|&c| &self.groups[c as usize].row_type)
            .collect();
        op.derive_row_type(&inputs)
    }

    /// Merge two groups and rebuild the structural index.
    pub fn merge(&mut self, a: GroupId, b: GroupId, origin: &str) -> Result<(), OptimizationError> {
        self.union(a, b, origin)?;
        self.rebuild(origin)
    }

    fn union(&mut self, a: GroupId, b: GroupId, origin: &str) -> Result<(), OptimizationError> {
        let (a, b) = (self.find(a), self.find(b));
        if a == b {
            return Ok(());
        }
        let (root, victim) = (a.min(b), a.max(b));
        if self.groups[root as usize].row_type != self.groups[victim as usize].row_type {
            return Err(OptimizationError::RowTypeMismatch {
                rule: origin.to_string(),
                expected: self.groups[root as usize].row_type.clone(),
                actual: self.groups[victim as usize].row_type.clone(),
            });
        }
        debug!("Merging group {} into group {}", victim, root);
        self.parent[victim as usize] = root;

        let moved = std::mem::take(&mut self.groups[victim as usize].exprs);
        let required = std::mem::take(&mut self.groups[victim as usize].required);
        let stats = self.groups[victim as usize].stats.take();
        self.groups[victim as usize].winners.clear();
        for &e in &moved {
            self.exprs[e as usize].group = root;
        }

        let target = &mut self.groups[root as usize];
        target.exprs.extend(moved);
        for c in required {
            target.require(c);
        }
        if target.stats.is_none() {
            target.stats = stats;
        }
        target.winners.clear();
        self.merges += 1;
        Ok(())
    }

    /// Canonicalize child ids and re-key every expression, merging groups whose
    /// expressions became equal. Repeats until no further merge is found.
    fn rebuild(&mut self, origin: &str) -> Result<(), OptimizationError> {
        loop {
            let canonical: Vec<Vec<GroupId>> = self
                .exprs
                .iter()
                .map(|e| e.children.iter().map(|&c| self.find(c)).collect())
                .collect();
            for (expr, children) in self.exprs.iter_mut().zip(canonical) {
                expr.children = children;
            }

            self.index.clear();
            let mut pending = None;
            for expr in &self.exprs {
                match self.index.get(&expr.key()) {
                    Some(&first) => {
                        let owner = self.exprs[first as usize].group;
                        if owner != expr.group {
                            pending = Some((owner, expr.group));
                            break;
                        }
                    }
                    None => {
                        self.index.insert(expr.key(), expr.id);
                    }
                }
            }

            match pending {
                Some((a, b)) => self.union(a, b, origin)?,
                None => return Ok(()),
            }
        }
    }

    pub fn rule_applied(&self, expr: ExprId, rule_hash: u64) -> bool {
        self.applied.contains(&(expr, rule_hash))
    }

    pub fn mark_rule_applied(&mut self, expr: ExprId, rule_hash: u64) {
        self.applied.insert((expr, rule_hash));
    }

    /// Extract the winner tree of `group` in `convention`.
    pub fn extract(
        &self,
        group: GroupId,
        convention: Convention,
    ) -> Result<PlanNode, OptimizationError> {
        let mut path = HashSet::new();
        self.extract_node(group, convention, &mut path)
    }

    fn extract_node(
        &self,
        group: GroupId,
        convention: Convention,
        path: &mut HashSet<(GroupId, Convention)>,
    ) -> Result<PlanNode, OptimizationError> {
        let group = self.find(group);
        if !path.insert((group, convention)) {
            return Err(OptimizationError::CyclicPlan { group, convention });
        }
        let g = &self.groups[group as usize];
        let Some(winner) = g.winners.get(&convention) else {
            let operator = g
                .exprs
                .first()
                .map(|&e| format!("{:?}", self.exprs[e as usize].op.kind()))
                .unwrap_or_default();
            return Err(OptimizationError::UnsatisfiableConvention {
                operator,
                required: convention,
            });
        };
        let expr = &self.exprs[winner.expr_id as usize];
        let mut children = Vec::with_capacity(expr.children.len());
        for (&child, &input) in expr.children.iter().zip(&expr.input_conventions) {
            children.push(self.extract_node(child, input, path)?);
        }
        path.remove(&(group, convention));

        Ok(PlanNode {
            id: expr.id,
            op: expr.op.clone(),
            convention: expr.convention,
            row_type: g.row_type.clone(),
            cost: winner.cost,
            rows: g.stats.as_ref().map(|s| s.row_count).unwrap_or(0.0),
            children,
        })
    }
}

/// A node of an extracted physical plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlanNode {
    /// Memo expression this node was extracted from; identifies the node.
    pub id: ExprId,
    pub op: Operator,
    pub convention: Convention,
    pub row_type: RowType,
    /// Cumulative cost of the subtree.
    pub cost: Cost,
    /// Estimated output rows.
    pub rows: f64,
    pub children: Vec<PlanNode>,
}

impl PlanNode {
    pub fn display(&self, indent: usize) -> String {
        let mut out = String::new();
        self.render(indent, &mut out);
        out
    }

    fn render(&self, indent: usize, out: &mut String) {
        let _ = writeln!(
            out,
            "{:indent$}{} <{}> (cost={:.2}, rows={:.0})",
            "",
            self.op,
            self.convention,
            self.cost.total,
            self.rows,
            indent = indent * 2
        );
        for child in &self.children {
            child.render(indent + 1, out);
        }
    }

    /// Pre-order traversal.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a PlanNode)) {
        f(self);
        for child in &self.children {
            child.walk(f);
        }
    }
}

/// The result of an optimization: an immutable tree of physical nodes.
#[derive(Debug, Clone, Serialize)]
pub struct PhysicalPlan {
    root: PlanNode,
    cost: Cost,
    truncated: bool,
}

impl PhysicalPlan {
    pub(crate) fn new(root: PlanNode, truncated: bool) -> Self {
        Self {
            cost: root.cost,
            root,
            truncated,
        }
    }

    pub fn root(&self) -> &PlanNode {
        &self.root
    }

    pub fn cost(&self) -> Cost {
        self.cost
    }

    /// True when the search stopped on a budget before reaching its fixpoint, or the
    /// selected plan exceeds the requested cost ceiling.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// All nodes in pre-order.
    pub fn nodes(&self) -> Vec<&PlanNode> {
        let mut nodes = Vec::new();
        self.root.walk(&mut |n| nodes.push(n));
        nodes
    }

    pub fn explain(&self) -> String {
        self.root.display(0)
    }
}
