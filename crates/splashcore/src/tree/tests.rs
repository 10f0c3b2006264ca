use super::*;
use pretty_assertions::assert_eq;
use splashproto::values;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn tasks(seeds: &[Seed]) -> Vec<(Task, &str)> {
    seeds.iter().map(|s| (s.task, s.path.as_str())).collect()
}

#[test]
fn create_leaf_creates_missing_parents() {
    let mut tree = Tree::new();
    tree.create_leaf_at("/a/b/c", 42).unwrap();

    assert!(tree.has_branch_at("/a"));
    assert!(tree.has_branch_at("/a/b"));
    assert_eq!(tree.get_value_for_leaf_at("/a/b/c"), Some(Value::from(42)));

    let updates = tree.get_update_seed_list();
    assert_eq!(
        tasks(&updates),
        vec![
            (Task::AddBranch, "/a"),
            (Task::AddBranch, "/a/b"),
            (Task::AddLeaf, "/a/b/c"),
        ]
    );
    assert_eq!(updates[2].value, Some(Value::from(42)));
    assert!(updates.iter().all(|s| s.source == tree.uuid()));
    assert!(tree.get_update_seed_list().is_empty());
}

#[test]
fn siblings_share_one_namespace() {
    let mut tree = Tree::new();
    tree.create_branch_at("/world/x").unwrap();

    assert_eq!(
        tree.create_leaf_at("/world/x", 1),
        Err(TreeError::AlreadyExists("x".to_string()))
    );
    assert_eq!(
        tree.create_branch_at("/world/x"),
        Err(TreeError::AlreadyExists("x".to_string()))
    );
}

#[test]
fn leaf_in_the_middle_of_a_path_is_not_a_branch() {
    let mut tree = Tree::new();
    tree.create_leaf_at("/a", 1).unwrap();
    assert!(matches!(tree.create_leaf_at("/a/b", 2), Err(TreeError::NoSuchBranch(_))));
}

#[test]
fn setting_the_same_value_records_nothing() {
    let mut tree = Tree::new();
    tree.create_leaf_at("/a", 1).unwrap();
    tree.get_update_seed_list();

    tree.set_value_for_leaf_at("/a", 1).unwrap();
    assert!(!tree.has_pending_updates());

    tree.set_value_for_leaf_at("/a", 2).unwrap();
    let updates = tree.get_update_seed_list();
    assert_eq!(tasks(&updates), vec![(Task::SetLeaf, "/a")]);
    assert_eq!(updates[0].value, Some(Value::from(2)));
}

#[test]
fn older_timestamps_are_refused_unless_forced() {
    let mut tree = Tree::new();
    tree.create_leaf_at("/a", 0).unwrap();
    tree.set_value_for_leaf_at_with_timestamp("/a", 1, i64::MAX - 10, false)
        .unwrap();

    let err = tree
        .set_value_for_leaf_at_with_timestamp("/a", 2, 5, false)
        .unwrap_err();
    assert!(matches!(err, TreeError::Stale { .. }));
    assert_eq!(tree.get_value_for_leaf_at("/a"), Some(Value::from(1)));

    // Equal timestamps are accepted.
    assert_eq!(
        tree.set_value_for_leaf_at_with_timestamp("/a", 3, i64::MAX - 10, false),
        Ok(LeafUpdate::Changed)
    );

    tree.set_value_for_leaf_at_with_timestamp("/a", 4, 5, true).unwrap();
    assert_eq!(tree.get_value_for_leaf_at("/a"), Some(Value::from(4)));
}

#[test]
fn rename_and_remove() {
    let mut tree = Tree::new();
    tree.create_leaf_at("/a/old", "x").unwrap();
    tree.create_branch_at("/a/sub").unwrap();

    tree.rename_leaf_at("/a/old", "new").unwrap();
    assert!(!tree.has_leaf_at("/a/old"));
    assert_eq!(tree.get_value_for_leaf_at("/a/new"), Some(Value::from("x")));

    tree.rename_branch_at("/a/sub", "other").unwrap();
    assert_eq!(tree.get_branch_list_at("/a"), Some(vec!["other".to_string()]));

    assert!(matches!(tree.rename_leaf_at("/a/new", "other"), Err(TreeError::AlreadyExists(_))));

    tree.remove_leaf_at("/a/new").unwrap();
    tree.remove_branch_at("/a/other").unwrap();
    assert!(tree.get_branch_at("/a").unwrap().is_empty());

    assert_eq!(
        tree.remove_leaf_at("/a/new"),
        Err(TreeError::NoSuchLeaf("/a/new".to_string()))
    );
}

#[test]
fn seeds_for_path_rebuild_the_subtree() {
    let mut source = Tree::new();
    source.create_leaf_at("/world/attributes/clock", values![1, 2]).unwrap();
    source.create_leaf_at("/world/name", "main").unwrap();
    source.create_branch_at("/world/objects").unwrap();

    let seeds = source.get_seeds_for_path("/").unwrap();
    assert_eq!(
        tasks(&seeds),
        vec![
            (Task::AddBranch, "/world"),
            (Task::AddBranch, "/world/attributes"),
            (Task::AddLeaf, "/world/attributes/clock"),
            (Task::SetLeaf, "/world/attributes/clock"),
            (Task::AddBranch, "/world/objects"),
            (Task::AddLeaf, "/world/name"),
            (Task::SetLeaf, "/world/name"),
        ]
    );
    assert!(seeds
        .iter()
        .filter(|s| s.task == Task::AddBranch)
        .all(|s| s.timestamp == 0));

    let mut replica = Tree::new();
    replica.add_seeds_to_queue(seeds);
    let report = replica.process_queue(false);
    assert_eq!(report.dropped, 0);
    assert_eq!(replica, source);
    assert!(!replica.has_pending_updates());
}

#[test]
fn seeds_for_a_leaf_carry_its_timestamp() {
    let mut tree = Tree::new();
    tree.create_leaf_at("/a", 1).unwrap();
    tree.set_value_for_leaf_at_with_timestamp("/a", 2, i64::MAX - 1, false)
        .unwrap();

    let seeds = tree.get_seeds_for_path("/a").unwrap();
    assert_eq!(tasks(&seeds), vec![(Task::AddLeaf, "/a"), (Task::SetLeaf, "/a")]);
    assert!(seeds.iter().all(|s| s.timestamp == i64::MAX - 1));
    assert_eq!(seeds[1].value, Some(Value::from(2)));

    assert!(matches!(tree.get_seeds_for_path("/missing"), Err(TreeError::NoSuchBranch(_))));
}

#[test]
fn own_seeds_are_skipped() {
    let mut tree = Tree::new();
    tree.create_leaf_at("/a", 1).unwrap();
    let echoed = tree.get_update_seed_list();

    tree.add_seeds_to_queue(echoed);
    let report = tree.process_queue(true);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.applied, 0);
    assert!(!tree.has_pending_updates());
}

#[test]
fn queued_seeds_apply_in_order_and_propagate_changes_only() {
    let peer = Uuid::new_v4();
    let mut tree = Tree::new();
    tree.create_leaf_at("/a", 0).unwrap();
    tree.get_update_seed_list();

    tree.add_seeds_to_queue(vec![
        Seed::new(Task::SetLeaf, "/a", Some(Value::from(1)), peer).with_timestamp(i64::MAX - 2),
        Seed::new(Task::SetLeaf, "/a", Some(Value::from(2)), peer).with_timestamp(i64::MAX - 1),
        Seed::new(Task::SetLeaf, "/a", Some(Value::from(2)), peer).with_timestamp(i64::MAX - 1),
    ]);
    let report = tree.process_queue(true);

    assert_eq!(report.applied, 3);
    assert_eq!(tree.get_value_for_leaf_at("/a"), Some(Value::from(2)));
    assert_eq!(tree.get_update_seed_list().len(), 2);
}

#[test]
fn bad_seeds_are_dropped_without_stopping_the_queue() {
    let peer = Uuid::new_v4();
    let mut tree = Tree::new();

    tree.add_seeds_to_queue(vec![
        Seed::new(Task::SetLeaf, "/missing", Some(Value::from(1)), peer),
        Seed::new(Task::RemoveBranch, "/nothing", None, peer),
        Seed::new(Task::AddLeaf, "/ok", Some(Value::from(7)), peer),
    ]);
    let report = tree.process_queue(false);

    assert_eq!(report.applied, 1);
    assert_eq!(report.dropped, 2);
    assert!(tree.has_error());
    assert_eq!(tree.get_value_for_leaf_at("/ok"), Some(Value::from(7)));

    tree.clear_error();
    assert!(tree.last_error().is_none());
}

#[test]
fn leaf_callbacks_fire_on_change() {
    let mut tree = Tree::new();
    tree.create_leaf_at("/a", 0).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let id = tree
        .add_callback_to_leaf_at("/a", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    tree.set_value_for_leaf_at("/a", 1).unwrap();
    tree.set_value_for_leaf_at("/a", 1).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tree.set_notify_on_unchanged(true);
    tree.set_value_for_leaf_at("/a", 1).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    assert!(tree.remove_callback_from_leaf_at("/a", id));
    tree.set_value_for_leaf_at("/a", 3).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn branch_callbacks_see_structural_changes() {
    let mut tree = Tree::new();
    tree.create_branch_at("/objects").unwrap();

    let added = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = added.clone();
    tree.add_callback_to_branch_at("/objects", BranchTask::AddBranch, move |_, name| {
        sink.lock().unwrap().push(name.to_string());
    })
    .unwrap();

    tree.create_branch_at("/objects/camera").unwrap();
    tree.create_leaf_at("/objects/gamma", 2.2).unwrap();
    assert_eq!(*added.lock().unwrap(), vec!["camera".to_string()]);
}

#[test]
fn cut_and_graft_a_branch() {
    let mut tree = Tree::new();
    tree.create_leaf_at("/src/node/value", 5).unwrap();
    tree.get_update_seed_list();

    let node = tree.cut_branch_at("/src/node").unwrap();
    assert!(!tree.has_branch_at("/src/node"));

    tree.add_branch_at("/dst", node).unwrap();
    assert_eq!(tree.get_value_for_leaf_at("/dst/node/value"), Some(Value::from(5)));

    let updates = tree.get_update_seed_list();
    assert_eq!(
        tasks(&updates),
        vec![
            (Task::RemoveBranch, "/src/node"),
            (Task::AddBranch, "/dst"),
            (Task::AddBranch, "/dst/node"),
            (Task::AddLeaf, "/dst/node/value"),
            (Task::SetLeaf, "/dst/node/value"),
        ]
    );
}

#[test]
fn cutdown_empties_everything() {
    let mut tree = Tree::new();
    tree.create_leaf_at("/a/b", 1).unwrap();
    tree.add_seeds_to_queue(vec![Seed::new(Task::AddBranch, "/c", None, Uuid::new_v4())]);
    tree.cutdown();

    assert!(tree.root().is_empty());
    assert!(!tree.has_pending_updates());
    assert_eq!(tree.process_queue(false), QueueReport::default());
}

#[test]
fn display_lists_nodes() {
    let mut tree = Tree::new();
    tree.create_leaf_at("/world/gamma", 2.2).unwrap();
    let dump = tree.to_string();
    assert!(dump.contains("world/"));
    assert!(dump.contains("gamma: 2.2"));
}

#[test]
fn replayed_additions_of_existing_nodes_are_idempotent() {
    let peer = Uuid::new_v4();
    let mut tree = Tree::new();
    tree.create_leaf_at("/world/gamma", 1.0).unwrap();
    tree.get_update_seed_list();

    tree.add_seeds_to_queue(vec![
        Seed::new(Task::AddBranch, "/world", None, peer),
        Seed::new(Task::AddLeaf, "/world/gamma", None, peer),
    ]);
    let report = tree.process_queue(true);
    assert_eq!(report.dropped, 0);
    assert!(!tree.has_pending_updates());
    assert_eq!(tree.get_value_for_leaf_at("/world/gamma"), Some(Value::from(1.0)));
}
