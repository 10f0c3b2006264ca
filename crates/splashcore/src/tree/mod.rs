//! The replicated tree.
//!
//! Every process holds one `Tree`: branches (namespaces) and leaves (values)
//! addressed by absolute paths. Local mutations are recorded as [`Seed`]s in
//! the update list, which the owner drains and ships to peers. Seeds received
//! from peers go through a [`SeedQueue`] that any thread may push to; they are
//! applied only when the owner calls [`Tree::process_queue`].
//!
//! ```text
//!  local set ──► Tree ──► update list ──► get_update_seed_list() ──► network
//!                  ▲
//!  network ──► SeedQueue ──► process_queue()
//! ```
//!
//! Parent branches are created on demand: adding `/a/b/c` to an empty tree
//! creates `/a` and `/a/b` first and records a seed for each of them. Seeds
//! that target a missing node any other way are dropped with a warning.

mod branch;
mod leaf;
pub mod path;
mod queue;

pub use branch::{Branch, BranchCallback, BranchTask};
pub use leaf::{Leaf, LeafCallback, LeafUpdate};
pub use queue::{QueueReport, SeedQueue};

use path::{child_path, join_path, split_path, validate_name};
use splashproto::{now, IdAllocator, Seed, Task, Timestamp, Value};
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifier of a registered leaf or branch callback.
pub type CallbackId = u32;

/// Errors raised by tree operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TreeError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error("Invalid node name: {0:?}")]
    InvalidName(String),
    #[error("No branch at {0}")]
    NoSuchBranch(String),
    #[error("No leaf at {0}")]
    NoSuchLeaf(String),
    #[error("A node named {0} already exists")]
    AlreadyExists(String),
    #[error("Stale update for {path}: timestamp {timestamp} is older than {current}")]
    Stale {
        path: String,
        timestamp: Timestamp,
        current: Timestamp,
    },
    #[error("{task:?} seed for {path} carries no value")]
    MissingValue { task: Task, path: String },
}

/// A replica of the hierarchical key/value tree.
pub struct Tree {
    name: String,
    uuid: Uuid,
    root: Branch,
    queue: SeedQueue,
    updates: Vec<Seed>,
    callback_ids: IdAllocator,
    notify_on_unchanged: bool,
    last_error: Option<TreeError>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        Self::with_name("")
    }

    /// A tree owned by the root object `name`. The name is informational.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uuid: Uuid::new_v4(),
            root: Branch::new(""),
            queue: SeedQueue::default(),
            updates: Vec::new(),
            callback_ids: IdAllocator::new(),
            notify_on_unchanged: false,
            last_error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source identifier stamped on every seed this tree produces.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn root(&self) -> &Branch {
        &self.root
    }

    /// Fire leaf callbacks even for updates that leave the value unchanged.
    pub fn set_notify_on_unchanged(&mut self, notify: bool) {
        self.notify_on_unchanged = notify;
    }

    pub fn notify_on_unchanged(&self) -> bool {
        self.notify_on_unchanged
    }

    // ---- seed exchange -------------------------------------------------

    /// Handle for pushing seeds from another thread.
    pub fn seed_queue(&self) -> SeedQueue {
        self.queue.clone()
    }

    /// Queue seeds for the next [`Tree::process_queue`]. Nothing is applied yet.
    pub fn add_seeds_to_queue(&self, seeds: impl IntoIterator<Item = Seed>) {
        self.queue.push(seeds);
    }

    /// Apply every queued seed in arrival order.
    ///
    /// Seeds produced by this very tree are skipped. Failed seeds are logged
    /// and dropped without stopping the rest. With `propagate`, seeds that
    /// changed the tree are appended to the update list so they can be
    /// forwarded to further peers.
    pub fn process_queue(&mut self, propagate: bool) -> QueueReport {
        let mut report = QueueReport::default();

        for seed in self.queue.drain() {
            if seed.source == self.uuid {
                report.skipped += 1;
                continue;
            }

            match self.apply_seed(&seed) {
                Ok(changed) => {
                    report.applied += 1;
                    if propagate && changed {
                        self.updates.push(seed);
                    }
                }
                Err(e) => {
                    warn!("Dropping {:?} seed for {}: {}", seed.task, seed.path, e);
                    report.dropped += 1;
                    self.last_error = Some(e);
                }
            }
        }

        if report.applied + report.dropped > 0 {
            debug!(
                "Tree {}: applied {} seeds, dropped {}",
                self.name, report.applied, report.dropped
            );
        }
        report
    }

    /// Drain the seeds recorded since the last call.
    pub fn get_update_seed_list(&mut self) -> Vec<Seed> {
        std::mem::take(&mut self.updates)
    }

    pub fn has_pending_updates(&self) -> bool {
        !self.updates.is_empty()
    }

    /// Seeds rebuilding the node at `path` (and everything below it) from an
    /// empty tree, parents before children.
    pub fn get_seeds_for_path(&self, path: &str) -> Result<Vec<Seed>, TreeError> {
        let parts = split_path(path)?;
        let normalized = join_path(&parts);
        let mut seeds = Vec::new();

        if let Some((last, parents)) = parts.split_last() {
            if let Some(leaf) = branch_at(&self.root, parents).and_then(|b| b.leaf(last)) {
                self.push_leaf_seeds(leaf, &normalized, &mut seeds);
                return Ok(seeds);
            }
        }

        let branch = branch_at(&self.root, &parts)
            .ok_or_else(|| TreeError::NoSuchBranch(normalized.clone()))?;
        self.push_branch_seeds(branch, &normalized, !parts.is_empty(), &mut seeds);
        Ok(seeds)
    }

    fn push_leaf_seeds(&self, leaf: &Leaf, path: &str, seeds: &mut Vec<Seed>) {
        seeds.push(Seed::new(Task::AddLeaf, path, None, self.uuid).with_timestamp(leaf.timestamp()));
        seeds.push(
            Seed::new(Task::SetLeaf, path, Some(leaf.value().clone()), self.uuid)
                .with_timestamp(leaf.timestamp()),
        );
    }

    fn push_branch_seeds(&self, branch: &Branch, path: &str, include_self: bool, seeds: &mut Vec<Seed>) {
        // Branches carry no timestamp; structural seeds only need a stable order.
        if include_self {
            seeds.push(Seed::new(Task::AddBranch, path, None, self.uuid).with_timestamp(0));
        }
        for child in branch.branches() {
            self.push_branch_seeds(child, &child_path(path, child.name()), true, seeds);
        }
        for leaf in branch.leaves() {
            self.push_leaf_seeds(leaf, &child_path(path, leaf.name()), seeds);
        }
    }

    /// Reset to an empty root, discarding queued and recorded seeds.
    pub fn cutdown(&mut self) {
        self.root = Branch::new("");
        self.queue.clear();
        self.updates.clear();
        self.last_error = None;
    }

    // ---- mutations -----------------------------------------------------

    /// Create a branch, creating missing parents along the way.
    pub fn create_branch_at(&mut self, path: &str) -> Result<(), TreeError> {
        self.create_branch(path, now(), true)
    }

    /// Create a leaf holding `value`, creating missing parents along the way.
    pub fn create_leaf_at(&mut self, path: &str, value: impl Into<Value>) -> Result<(), TreeError> {
        self.create_leaf(path, Some(value.into()), now(), true)
    }

    pub fn remove_branch_at(&mut self, path: &str) -> Result<(), TreeError> {
        self.remove_branch(path, now(), true).map(|_| ())
    }

    pub fn remove_leaf_at(&mut self, path: &str) -> Result<(), TreeError> {
        self.remove_leaf(path, now(), true)
    }

    pub fn rename_branch_at(&mut self, path: &str, new_name: &str) -> Result<(), TreeError> {
        self.rename_branch(path, new_name, now(), true)
    }

    pub fn rename_leaf_at(&mut self, path: &str, new_name: &str) -> Result<(), TreeError> {
        self.rename_leaf(path, new_name, now(), true)
    }

    /// Set a leaf to `value`, stamped with the current time.
    ///
    /// Setting a leaf to the value it already holds succeeds without recording
    /// a seed.
    pub fn set_value_for_leaf_at(&mut self, path: &str, value: impl Into<Value>) -> Result<(), TreeError> {
        self.set_leaf(path, value.into(), now(), false, true).map(|_| ())
    }

    /// Set a leaf with an explicit timestamp. Unless `force` is set, an update
    /// older than the leaf's current value is refused.
    pub fn set_value_for_leaf_at_with_timestamp(
        &mut self,
        path: &str,
        value: impl Into<Value>,
        timestamp: Timestamp,
        force: bool,
    ) -> Result<LeafUpdate, TreeError> {
        self.set_leaf(path, value.into(), timestamp, force, true)
    }

    /// Detach the branch at `path` and hand it to the caller.
    pub fn cut_branch_at(&mut self, path: &str) -> Result<Branch, TreeError> {
        self.remove_branch(path, now(), true)
    }

    /// Graft `branch` (with everything below it) under `parent_path`.
    pub fn add_branch_at(&mut self, parent_path: &str, branch: Branch) -> Result<(), TreeError> {
        let parts = split_path(parent_path)?;
        let path = child_path(&join_path(&parts), branch.name());
        let timestamp = now();

        let mut created = Vec::new();
        let parent = ensure_chain(&mut self.root, &parts, &mut created)?;
        let grafted = branch.clone();
        parent.add_branch(branch)?;

        self.record_created(created, timestamp);
        let mut seeds = Vec::new();
        self.push_branch_seeds(&grafted, &path, true, &mut seeds);
        self.updates.extend(seeds);
        Ok(())
    }

    // ---- queries -------------------------------------------------------

    pub fn get_value_for_leaf_at(&self, path: &str) -> Option<Value> {
        self.leaf_at(path).map(|leaf| leaf.value().clone())
    }

    pub fn get_leaf_timestamp_at(&self, path: &str) -> Option<Timestamp> {
        self.leaf_at(path).map(Leaf::timestamp)
    }

    pub fn get_branch_at(&self, path: &str) -> Option<&Branch> {
        let parts = split_path(path).ok()?;
        branch_at(&self.root, &parts)
    }

    /// Names of the branches directly under `path`, in stable sorted order.
    pub fn get_branch_list_at(&self, path: &str) -> Option<Vec<String>> {
        self.get_branch_at(path).map(Branch::branch_names)
    }

    /// Names of the leaves directly under `path`, in stable sorted order.
    pub fn get_leaf_list_at(&self, path: &str) -> Option<Vec<String>> {
        self.get_branch_at(path).map(Branch::leaf_names)
    }

    pub fn has_branch_at(&self, path: &str) -> bool {
        self.get_branch_at(path).is_some()
    }

    pub fn has_leaf_at(&self, path: &str) -> bool {
        self.leaf_at(path).is_some()
    }

    fn leaf_at(&self, path: &str) -> Option<&Leaf> {
        let parts = split_path(path).ok()?;
        let (last, parents) = parts.split_last()?;
        branch_at(&self.root, parents)?.leaf(last)
    }

    // ---- callbacks -----------------------------------------------------

    /// Call `callback` with every new value of the leaf at `path`.
    pub fn add_callback_to_leaf_at(
        &mut self,
        path: &str,
        callback: impl Fn(&Value, Timestamp) + Send + Sync + 'static,
    ) -> Result<CallbackId, TreeError> {
        let id = self.callback_ids.next_id();
        self.leaf_mut_at(path)?
            .add_callback(id, std::sync::Arc::new(callback));
        Ok(id)
    }

    pub fn remove_callback_from_leaf_at(&mut self, path: &str, id: CallbackId) -> bool {
        self.leaf_mut_at(path)
            .map(|leaf| leaf.remove_callback(id))
            .unwrap_or(false)
    }

    /// Call `callback` whenever `task` happens to a direct child of the branch.
    pub fn add_callback_to_branch_at(
        &mut self,
        path: &str,
        task: BranchTask,
        callback: impl Fn(&Branch, &str) + Send + Sync + 'static,
    ) -> Result<CallbackId, TreeError> {
        let id = self.callback_ids.next_id();
        self.branch_mut_at(path)?
            .add_callback(id, task, std::sync::Arc::new(callback));
        Ok(id)
    }

    pub fn remove_callback_from_branch_at(&mut self, path: &str, id: CallbackId) -> bool {
        self.branch_mut_at(path)
            .map(|branch| branch.remove_callback(id))
            .unwrap_or(false)
    }

    // ---- errors --------------------------------------------------------

    /// The last error hit while processing queued seeds.
    pub fn last_error(&self) -> Option<&TreeError> {
        self.last_error.as_ref()
    }

    pub fn has_error(&self) -> bool {
        self.last_error.is_some()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    // ---- internals -----------------------------------------------------

    /// Apply a seed without recording it. Returns whether the tree changed.
    fn apply_seed(&mut self, seed: &Seed) -> Result<bool, TreeError> {
        let ts = seed.timestamp;
        match seed.task {
            // Replicas converge on the same structure, so re-adding a node
            // that already exists is a no-op rather than an error.
            Task::AddBranch if self.has_branch_at(&seed.path) => Ok(false),
            Task::AddBranch => self.create_branch(&seed.path, ts, false).map(|_| true),
            Task::AddLeaf if self.has_leaf_at(&seed.path) => match seed.value.clone() {
                Some(value) => self
                    .set_leaf(&seed.path, value, ts, false, false)
                    .map(|update| update == LeafUpdate::Changed),
                None => Ok(false),
            },
            Task::AddLeaf => self
                .create_leaf(&seed.path, seed.value.clone(), ts, false)
                .map(|_| true),
            Task::RemoveBranch => self.remove_branch(&seed.path, ts, false).map(|_| true),
            Task::RemoveLeaf => self.remove_leaf(&seed.path, ts, false).map(|_| true),
            Task::RenameBranch => {
                let name = seed_name(seed)?;
                self.rename_branch(&seed.path, name, ts, false).map(|_| true)
            }
            Task::RenameLeaf => {
                let name = seed_name(seed)?;
                self.rename_leaf(&seed.path, name, ts, false).map(|_| true)
            }
            Task::SetLeaf => {
                let value = seed.value.clone().ok_or_else(|| TreeError::MissingValue {
                    task: seed.task,
                    path: seed.path.clone(),
                })?;
                self.set_leaf(&seed.path, value, ts, false, false)
                    .map(|update| update == LeafUpdate::Changed)
            }
        }
    }

    fn record(&mut self, task: Task, path: String, value: Option<Value>, timestamp: Timestamp) {
        self.updates
            .push(Seed::new(task, path, value, self.uuid).with_timestamp(timestamp));
    }

    fn record_created(&mut self, created: Vec<String>, timestamp: Timestamp) {
        for path in created {
            self.record(Task::AddBranch, path, None, timestamp);
        }
    }

    fn create_branch(&mut self, path: &str, timestamp: Timestamp, record: bool) -> Result<(), TreeError> {
        let parts = split_path(path)?;
        let (last, parents) = parts
            .split_last()
            .ok_or_else(|| TreeError::AlreadyExists("/".to_string()))?;

        let mut created = Vec::new();
        let parent = ensure_chain(&mut self.root, parents, &mut created)?;
        parent.add_branch(Branch::new(*last))?;

        if record {
            self.record_created(created, timestamp);
            self.record(Task::AddBranch, join_path(&parts), None, timestamp);
        }
        Ok(())
    }

    fn create_leaf(
        &mut self,
        path: &str,
        value: Option<Value>,
        timestamp: Timestamp,
        record: bool,
    ) -> Result<(), TreeError> {
        let parts = split_path(path)?;
        let (last, parents) = parts
            .split_last()
            .ok_or_else(|| TreeError::InvalidPath(path.to_string()))?;

        let mut created = Vec::new();
        let parent = ensure_chain(&mut self.root, parents, &mut created)?;
        parent.add_leaf(Leaf::new(*last, value.clone().unwrap_or_default(), timestamp))?;

        if record {
            self.record_created(created, timestamp);
            self.record(Task::AddLeaf, join_path(&parts), value, timestamp);
        }
        Ok(())
    }

    fn remove_branch(&mut self, path: &str, timestamp: Timestamp, record: bool) -> Result<Branch, TreeError> {
        let parts = split_path(path)?;
        let normalized = join_path(&parts);
        let (last, parents) = parts
            .split_last()
            .ok_or_else(|| TreeError::InvalidPath(path.to_string()))?;

        let branch = branch_at_mut(&mut self.root, parents)
            .and_then(|parent| parent.remove_branch(last))
            .ok_or_else(|| TreeError::NoSuchBranch(normalized.clone()))?;

        if record {
            self.record(Task::RemoveBranch, normalized, None, timestamp);
        }
        Ok(branch)
    }

    fn remove_leaf(&mut self, path: &str, timestamp: Timestamp, record: bool) -> Result<(), TreeError> {
        let parts = split_path(path)?;
        let normalized = join_path(&parts);
        let (last, parents) = parts
            .split_last()
            .ok_or_else(|| TreeError::InvalidPath(path.to_string()))?;

        branch_at_mut(&mut self.root, parents)
            .and_then(|parent| parent.remove_leaf(last))
            .ok_or_else(|| TreeError::NoSuchLeaf(normalized.clone()))?;

        if record {
            self.record(Task::RemoveLeaf, normalized, None, timestamp);
        }
        Ok(())
    }

    fn rename_branch(
        &mut self,
        path: &str,
        new_name: &str,
        timestamp: Timestamp,
        record: bool,
    ) -> Result<(), TreeError> {
        validate_name(new_name)?;
        let parts = split_path(path)?;
        let normalized = join_path(&parts);
        let (last, parents) = parts
            .split_last()
            .ok_or_else(|| TreeError::InvalidPath(path.to_string()))?;

        let parent = branch_at_mut(&mut self.root, parents)
            .ok_or_else(|| TreeError::NoSuchBranch(normalized.clone()))?;
        parent
            .rename_branch(last, new_name)
            .map_err(|e| match e {
                TreeError::NoSuchBranch(_) => TreeError::NoSuchBranch(normalized.clone()),
                other => other,
            })?;

        if record {
            self.record(Task::RenameBranch, normalized, Some(Value::from(new_name)), timestamp);
        }
        Ok(())
    }

    fn rename_leaf(
        &mut self,
        path: &str,
        new_name: &str,
        timestamp: Timestamp,
        record: bool,
    ) -> Result<(), TreeError> {
        validate_name(new_name)?;
        let parts = split_path(path)?;
        let normalized = join_path(&parts);
        let (last, parents) = parts
            .split_last()
            .ok_or_else(|| TreeError::InvalidPath(path.to_string()))?;

        let parent = branch_at_mut(&mut self.root, parents)
            .ok_or_else(|| TreeError::NoSuchLeaf(normalized.clone()))?;
        parent
            .rename_leaf(last, new_name)
            .map_err(|e| match e {
                TreeError::NoSuchLeaf(_) => TreeError::NoSuchLeaf(normalized.clone()),
                other => other,
            })?;

        if record {
            self.record(Task::RenameLeaf, normalized, Some(Value::from(new_name)), timestamp);
        }
        Ok(())
    }

    fn set_leaf(
        &mut self,
        path: &str,
        value: Value,
        timestamp: Timestamp,
        force: bool,
        record: bool,
    ) -> Result<LeafUpdate, TreeError> {
        let parts = split_path(path)?;
        let normalized = join_path(&parts);
        let notify = self.notify_on_unchanged;

        let recorded = record.then(|| value.clone());
        let update = leaf_at_parts_mut(&mut self.root, &parts)
            .ok_or_else(|| TreeError::NoSuchLeaf(normalized.clone()))?
            .set(&normalized, value, timestamp, force, notify)?;

        if update == LeafUpdate::Changed {
            if let Some(value) = recorded {
                self.record(Task::SetLeaf, normalized, Some(value), timestamp);
            }
        }
        Ok(update)
    }

    fn leaf_mut_at(&mut self, path: &str) -> Result<&mut Leaf, TreeError> {
        let parts = split_path(path)?;
        let normalized = join_path(&parts);
        leaf_at_parts_mut(&mut self.root, &parts).ok_or(TreeError::NoSuchLeaf(normalized))
    }

    fn branch_mut_at(&mut self, path: &str) -> Result<&mut Branch, TreeError> {
        let parts = split_path(path)?;
        let normalized = join_path(&parts);
        branch_at_mut(&mut self.root, &parts).ok_or(TreeError::NoSuchBranch(normalized))
    }
}

// Structural equality: same names, same leaf values.
impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("name", &self.name)
            .field("uuid", &self.uuid)
            .field("root", &self.root)
            .field("pending_updates", &self.updates.len())
            .finish()
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "/")?;
        fmt::Display::fmt(&self.root, f)
    }
}

fn seed_name(seed: &Seed) -> Result<&str, TreeError> {
    seed.value
        .as_ref()
        .and_then(Value::as_str)
        .ok_or_else(|| TreeError::MissingValue {
            task: seed.task,
            path: seed.path.clone(),
        })
}

fn branch_at<'a>(root: &'a Branch, parts: &[&str]) -> Option<&'a Branch> {
    parts.iter().try_fold(root, |branch, part| branch.branch(part))
}

fn branch_at_mut<'a>(root: &'a mut Branch, parts: &[&str]) -> Option<&'a mut Branch> {
    let mut current = root;
    for part in parts {
        current = current.branch_mut(part)?;
    }
    Some(current)
}

fn leaf_at_parts_mut<'a>(root: &'a mut Branch, parts: &[&str]) -> Option<&'a mut Leaf> {
    let (last, parents) = parts.split_last()?;
    branch_at_mut(root, parents)?.leaf_mut(last)
}

/// Walk `parts` from `root`, creating missing branches. Paths of the created
/// branches are appended to `created`, parents first.
fn ensure_chain<'a>(
    root: &'a mut Branch,
    parts: &[&str],
    created: &mut Vec<String>,
) -> Result<&'a mut Branch, TreeError> {
    let mut current = root;
    for (depth, part) in parts.iter().enumerate() {
        if current.leaf(part).is_some() {
            return Err(TreeError::NoSuchBranch(join_path(&parts[..=depth])));
        }
        if current.branch(part).is_none() {
            current.add_branch(Branch::new(*part))?;
            created.push(join_path(&parts[..=depth]));
        }
        current = current
            .branch_mut(part)
            .ok_or_else(|| TreeError::NoSuchBranch(join_path(&parts[..=depth])))?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests;
