use super::leaf::Leaf;
use super::path::validate_name;
use super::{CallbackId, TreeError};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Structural changes a branch reports to its callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchTask {
    AddBranch,
    AddLeaf,
    RemoveBranch,
    RemoveLeaf,
}

/// Called with the modified branch and the name of the child involved.
pub type BranchCallback = Arc<dyn Fn(&Branch, &str) + Send + Sync>;

/// An internal node: named children, branches and leaves sharing one namespace.
#[derive(Clone)]
pub struct Branch {
    name: String,
    branches: BTreeMap<String, Branch>,
    leaves: BTreeMap<String, Leaf>,
    callbacks: Vec<(CallbackId, BranchTask, BranchCallback)>,
}

impl Branch {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            branches: BTreeMap::new(),
            leaves: BTreeMap::new(),
            callbacks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn branch(&self, name: &str) -> Option<&Branch> {
        self.branches.get(name)
    }

    pub fn branch_mut(&mut self, name: &str) -> Option<&mut Branch> {
        self.branches.get_mut(name)
    }

    pub fn leaf(&self, name: &str) -> Option<&Leaf> {
        self.leaves.get(name)
    }

    pub(crate) fn leaf_mut(&mut self, name: &str) -> Option<&mut Leaf> {
        self.leaves.get_mut(name)
    }

    pub fn branches(&self) -> impl Iterator<Item = &Branch> {
        self.branches.values()
    }

    pub fn leaves(&self) -> impl Iterator<Item = &Leaf> {
        self.leaves.values()
    }

    pub fn branch_names(&self) -> Vec<String> {
        self.branches.keys().cloned().collect()
    }

    pub fn leaf_names(&self) -> Vec<String> {
        self.leaves.keys().cloned().collect()
    }

    pub fn has_child(&self, name: &str) -> bool {
        self.branches.contains_key(name) || self.leaves.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty() && self.leaves.is_empty()
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub(crate) fn add_branch(&mut self, branch: Branch) -> Result<(), TreeError> {
        validate_name(&branch.name)?;
        if self.has_child(&branch.name) {
            return Err(TreeError::AlreadyExists(branch.name));
        }
        let name = branch.name.clone();
        self.branches.insert(name.clone(), branch);
        self.notify(BranchTask::AddBranch, &name);
        Ok(())
    }

    pub(crate) fn add_leaf(&mut self, leaf: Leaf) -> Result<(), TreeError> {
        validate_name(leaf.name())?;
        if self.has_child(leaf.name()) {
            return Err(TreeError::AlreadyExists(leaf.name().to_string()));
        }
        let name = leaf.name().to_string();
        self.leaves.insert(name.clone(), leaf);
        self.notify(BranchTask::AddLeaf, &name);
        Ok(())
    }

    pub(crate) fn remove_branch(&mut self, name: &str) -> Option<Branch> {
        let branch = self.branches.remove(name)?;
        self.notify(BranchTask::RemoveBranch, name);
        Some(branch)
    }

    pub(crate) fn remove_leaf(&mut self, name: &str) -> Option<Leaf> {
        let leaf = self.leaves.remove(name)?;
        self.notify(BranchTask::RemoveLeaf, name);
        Some(leaf)
    }

    /// Renames move the child without firing add/remove callbacks.
    pub(crate) fn rename_branch(&mut self, old: &str, new: &str) -> Result<(), TreeError> {
        validate_name(new)?;
        if self.has_child(new) {
            return Err(TreeError::AlreadyExists(new.to_string()));
        }
        let mut branch = self
            .branches
            .remove(old)
            .ok_or_else(|| TreeError::NoSuchBranch(old.to_string()))?;
        branch.set_name(new);
        self.branches.insert(new.to_string(), branch);
        Ok(())
    }

    pub(crate) fn rename_leaf(&mut self, old: &str, new: &str) -> Result<(), TreeError> {
        validate_name(new)?;
        if self.has_child(new) {
            return Err(TreeError::AlreadyExists(new.to_string()));
        }
        let mut leaf = self
            .leaves
            .remove(old)
            .ok_or_else(|| TreeError::NoSuchLeaf(old.to_string()))?;
        leaf.set_name(new);
        self.leaves.insert(new.to_string(), leaf);
        Ok(())
    }

    pub(crate) fn add_callback(&mut self, id: CallbackId, task: BranchTask, callback: BranchCallback) {
        self.callbacks.push((id, task, callback));
    }

    pub(crate) fn remove_callback(&mut self, id: CallbackId) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(cb_id, _, _)| *cb_id != id);
        self.callbacks.len() != before
    }

    fn notify(&self, task: BranchTask, child: &str) {
        for (_, cb_task, callback) in &self.callbacks {
            if *cb_task == task {
                callback(self, child);
            }
        }
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        for branch in self.branches.values() {
            writeln!(f, "{}{}/", indent, branch.name)?;
            branch.fmt_indented(f, depth + 1)?;
        }
        for leaf in self.leaves.values() {
            writeln!(f, "{}{}: {}", indent, leaf.name(), leaf.value())?;
        }
        Ok(())
    }
}

impl PartialEq for Branch {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.branches == other.branches && self.leaves == other.leaves
    }
}

impl fmt::Debug for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Branch")
            .field("name", &self.name)
            .field("branches", &self.branches)
            .field("leaves", &self.leaves)
            .finish()
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}
