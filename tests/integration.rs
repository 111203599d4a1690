//! Integration tests for the branch store.

use branch_store::{
    BranchStore, CreateBranchOptions, EditOptions, ForkOptions, MergeOptions, MergeStrategy,
    MessageInput, StoreConfig, StoreError, StoreEvent, SubscriptionFilter, Timestamp, MAIN_BRANCH,
};
use std::time::Duration;

fn test_store() -> BranchStore {
    BranchStore::in_memory(StoreConfig::default())
}

fn contents(store: &BranchStore, branch: &str) -> Vec<String> {
    store
        .get_branch(branch)
        .unwrap()
        .messages
        .iter()
        .map(|m| m.content.clone())
        .collect()
}

// --- Realistic Workflow Tests ---

#[test]
fn test_fork_then_diverge() {
    let store = test_store();
    store.add_message(MessageInput::user("A"));
    store.add_message(MessageInput::assistant("B"));

    store
        .fork(
            "alt",
            ForkOptions {
                switch_to: false,
                ..ForkOptions::from_message(1)
            },
        )
        .unwrap();
    store.switch_branch("alt").unwrap();
    store.add_message(MessageInput::user("C"));

    assert_eq!(contents(&store, MAIN_BRANCH), vec!["A", "B"]);
    assert_eq!(contents(&store, "alt"), vec!["A", "B", "C"]);

    let diff = store.compare_branches(MAIN_BRANCH, "alt").unwrap();
    assert_eq!(diff.divergence_point, 2);
    assert!(diff.unique_to_a.is_empty());
    assert_eq!(diff.unique_to_b.len(), 1);
    assert!((diff.similarity - 2.0 / 3.0).abs() < 1e-9);
}

#[test]
fn test_agent_retry_workflow() {
    let store = test_store();
    store.add_message(MessageInput::system("You are terse."));
    store.add_message(MessageInput::user("Summarize the report"));
    let answer = store.add_message(MessageInput::assistant("It is long."));

    // Regenerate the answer on a new branch
    let outcome = store
        .edit_message(answer.id, "Revenue grew 12%.", EditOptions::default())
        .unwrap();
    let created = outcome.created.unwrap();
    assert!(created.name.starts_with("edit-"));
    assert_eq!(store.current_branch_name(), created.name);
    assert_eq!(outcome.previous_branch, MAIN_BRANCH);

    let edited = &store.current_branch().messages[2];
    assert_eq!(edited.content, "Revenue grew 12%.");
    assert!(edited.edited);
    assert_eq!(edited.original_content.as_deref(), Some("It is long."));

    // Main still holds the original answer
    assert_eq!(contents(&store, MAIN_BRANCH)[2], "It is long.");

    let diff = store
        .compare_branches(MAIN_BRANCH, &created.name)
        .unwrap();
    assert_eq!(diff.divergence_point, 2);
}

#[test]
fn test_edit_in_place() {
    let store = test_store();
    let message = store.add_message(MessageInput::user("typo"));

    let outcome = store
        .edit_message(message.id, "fixed", EditOptions::in_place())
        .unwrap();
    assert!(outcome.created.is_none());
    assert_eq!(store.branch_count(), 1);
    assert_eq!(contents(&store, MAIN_BRANCH), vec!["fixed"]);
}

#[test]
fn test_merge_append() {
    let store = test_store();
    store.create_branch("target", None, CreateBranchOptions::default()).unwrap();
    store.create_branch("source", None, CreateBranchOptions::default()).unwrap();

    store.switch_branch("target").unwrap();
    store.add_message(MessageInput::user("m1"));
    store.add_message(MessageInput::user("m2"));
    store.switch_branch("source").unwrap();
    store.add_message(MessageInput::user("m3"));
    store.add_message(MessageInput::user("m4"));

    let outcome = store
        .merge_branches("source", "target", MergeOptions::default())
        .unwrap();
    assert_eq!(outcome.strategy, MergeStrategy::Append);
    assert!(outcome.deleted.is_none());

    assert_eq!(contents(&store, "target"), vec!["m1", "m2", "m3", "m4"]);
    assert_eq!(contents(&store, "source"), vec!["m3", "m4"]);

    let target = store.get_branch("target").unwrap();
    assert_eq!(target.metadata.merge_history.len(), 1);
    assert_eq!(target.metadata.merge_history[0].from, "source");
    assert_eq!(target.metadata.merge_history[0].author, "user");
    assert_eq!(target.stats.message_count, 4);
}

#[test]
fn test_merge_interleave_and_delete_source() {
    let store = test_store();
    store.create_branch("a", None, CreateBranchOptions::default()).unwrap();
    store.create_branch("b", None, CreateBranchOptions::default()).unwrap();

    store.switch_branch("a").unwrap();
    for ts in [10, 30, 50] {
        store.add_message(
            MessageInput::user(format!("a{}", ts)).with_timestamp(Timestamp::from_millis(ts)),
        );
    }
    store.switch_branch("b").unwrap();
    for ts in [20, 40] {
        store.add_message(
            MessageInput::user(format!("b{}", ts)).with_timestamp(Timestamp::from_millis(ts)),
        );
    }

    store
        .merge_branches(
            "b",
            "a",
            MergeOptions {
                strategy: MergeStrategy::Interleave,
                delete_source: true,
                author: Some("reviewer".into()),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(contents(&store, "a"), vec!["a10", "b20", "a30", "b40", "a50"]);
    assert!(store.get_branch("b").is_none());
    // "b" was current, so deletion moved us to the root
    assert_eq!(store.current_branch_name(), MAIN_BRANCH);
    assert_eq!(
        store.get_branch("a").unwrap().metadata.merge_history[0].author,
        "reviewer"
    );
}

#[test]
fn test_merge_into_protected_requires_force() {
    let store = test_store();
    store.fork("idea", ForkOptions::default()).unwrap();
    store.add_message(MessageInput::user("worth keeping"));

    assert!(store
        .merge_branches("idea", MAIN_BRANCH, MergeOptions::default())
        .is_err());

    store
        .merge_branches(
            "idea",
            MAIN_BRANCH,
            MergeOptions {
                force: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(contents(&store, MAIN_BRANCH), vec!["worth keeping"]);
}

#[test]
fn test_replace_merge_keeps_shared_prefix() {
    let store = test_store();
    store.add_message(MessageInput::user("q"));
    store.add_message(MessageInput::assistant("first answer"));

    // Rewrite the answer on a fork, then replace a copy of main with it
    store.fork("rewrite", ForkOptions::from_message(0)).unwrap();
    store.add_message(MessageInput::assistant("second answer"));

    store.switch_branch(MAIN_BRANCH).unwrap();
    store.fork("target", ForkOptions::default()).unwrap();
    store
        .merge_branches(
            "rewrite",
            "target",
            MergeOptions::with_strategy(MergeStrategy::Replace),
        )
        .unwrap();

    assert_eq!(contents(&store, "target"), vec!["q", "second answer"]);
}

// --- Checkpoints ---

#[test]
fn test_checkpoint_round_trip() {
    let store = test_store();
    store.add_message(MessageInput::user("hello"));
    store.fork("alt", ForkOptions::default()).unwrap();
    store.add_message(MessageInput::assistant("hi"));

    let before = store.list_branches();
    let summary = store.create_checkpoint("c1", Some("before cleanup")).unwrap();
    assert_eq!(summary.branch_count, 2);
    assert_eq!(summary.current_branch, "alt");

    // Arbitrary mutations
    store.switch_branch(MAIN_BRANCH).unwrap();
    store.delete_branch("alt").unwrap();
    store.add_message(MessageInput::user("more"));
    store.create_branch("other", None, CreateBranchOptions::default()).unwrap();

    store.restore_checkpoint("c1").unwrap();
    assert_eq!(store.list_branches(), before);
    assert_eq!(store.current_branch_name(), "alt");
    store.check_invariants().unwrap();

    // Ids keep increasing after a restore
    let max_before = before
        .iter()
        .flat_map(|b| b.messages.iter().map(|m| m.id))
        .max()
        .unwrap();
    let next = store.add_message(MessageInput::user("after restore"));
    assert!(next.id > max_before);
}

#[test]
fn test_checkpoint_listing() {
    let store = test_store();
    store.create_checkpoint("one", None).unwrap();
    store.create_checkpoint("two", None).unwrap();

    let names: Vec<String> = store
        .list_checkpoints()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["one", "two"]);

    store.delete_checkpoint("one").unwrap();
    assert_eq!(store.list_checkpoints().len(), 1);
}

// --- Export / Import ---

#[test]
fn test_export_import_round_trip() {
    let store = test_store();
    store.add_message(MessageInput::user("hello"));
    store
        .fork(
            "alt",
            ForkOptions {
                description: Some("alternative".into()),
                tags: vec!["draft".into()],
                ..Default::default()
            },
        )
        .unwrap();
    store.add_message(MessageInput::assistant("hi"));

    let before = store.list_branches();
    let envelope = store.export_branches();
    assert_eq!(envelope.version, "1.0");

    store.create_branch("later", None, CreateBranchOptions::default()).unwrap();
    store.import_branches(envelope).unwrap();

    let after = store.list_branches();
    assert_eq!(after.len(), before.len());
    for (a, b) in before.iter().zip(after.iter()) {
        assert_eq!(a.name, b.name);
        assert_eq!(a.parent, b.parent);
        assert_eq!(a.messages, b.messages);
        assert_eq!(a.metadata, b.metadata);
    }
    assert_eq!(store.current_branch_name(), "alt");
}

#[test]
fn test_import_clears_checkpoints() {
    let store = test_store();
    store.add_message(MessageInput::user("hello"));
    let envelope = store.export_branches();

    store.fork("scratch", ForkOptions::default()).unwrap();
    store.create_checkpoint("c1", None).unwrap();

    store.import_branches(envelope).unwrap();

    assert!(store.list_checkpoints().is_empty());
    assert!(matches!(
        store.restore_checkpoint("c1"),
        Err(StoreError::CheckpointNotFound(_))
    ));
    assert!(store.get_branch("scratch").is_none());
    assert_eq!(store.current_branch_name(), MAIN_BRANCH);
}

#[test]
fn test_json_between_stores() {
    let source = test_store();
    source.add_message(MessageInput::user("hello"));
    source.fork("alt", ForkOptions::default()).unwrap();
    let json = source.export_json().unwrap();

    let target = test_store();
    target.import_json(&json).unwrap();
    assert_eq!(target.list_branches(), source.list_branches());
    assert_eq!(target.current_branch_name(), "alt");

    // Ids continue past the imported ones
    let message = target.add_message(MessageInput::user("next"));
    let imported_max = source
        .list_branches()
        .iter()
        .flat_map(|b| b.messages.iter().map(|m| m.id))
        .max()
        .unwrap();
    assert!(message.id > imported_max);
}

// --- Tree Queries ---

#[test]
fn test_tree_queries() {
    let store = test_store();
    store.fork("a", ForkOptions::default()).unwrap();
    store.fork("a1", ForkOptions::default()).unwrap();
    store.switch_branch(MAIN_BRANCH).unwrap();
    store.create_branch("b", None, CreateBranchOptions::default()).unwrap();

    let ancestry: Vec<String> = store
        .ancestry("a1")
        .unwrap()
        .into_iter()
        .map(|b| b.name)
        .collect();
    assert_eq!(ancestry, vec!["a1", "a", MAIN_BRANCH]);

    let children: Vec<String> = store
        .child_branches(MAIN_BRANCH)
        .into_iter()
        .map(|b| b.name)
        .collect();
    assert_eq!(children, vec!["a", "b"]);

    let tree = store.visualize_branches().unwrap();
    assert_eq!(tree.size(), 4);
    assert_eq!(
        tree.to_string(),
        "main (0 messages)\n├── a (0 messages)\n│   └── a1 (0 messages)\n└── b (0 messages)\n"
    );
}

#[test]
fn test_delete_current_switches_to_root() {
    let store = test_store();
    store.fork("tmp", ForkOptions::default()).unwrap();
    assert_eq!(store.current_branch_name(), "tmp");

    store.delete_branch("tmp").unwrap();
    assert_eq!(store.current_branch_name(), MAIN_BRANCH);
    assert_eq!(store.branch_count(), 1);
}

#[test]
fn test_metadata_updates() {
    let store = test_store();
    store.create_branch("x", None, CreateBranchOptions::default()).unwrap();

    let branch = store
        .update_branch_metadata("x", Some("exploring".into()), Some(vec!["wip".into()]))
        .unwrap();
    assert_eq!(branch.metadata.description.as_deref(), Some("exploring"));
    assert_eq!(branch.metadata.tags, vec!["wip"]);

    store.set_branch_protected("x", true).unwrap();
    assert!(store.delete_branch("x").is_err());
    store.set_branch_protected("x", false).unwrap();
    store.delete_branch("x").unwrap();
}

// --- Events ---

#[test]
fn test_event_stream() {
    let store = test_store();
    let all = store.subscribe(SubscriptionFilter::all());
    let messages = store.subscribe(SubscriptionFilter::messages());

    store.add_message(MessageInput::user("hello"));
    store.fork("alt", ForkOptions::default()).unwrap();
    store.create_checkpoint("c1", None).unwrap();

    let events = all.drain();
    assert_eq!(events.len(), 4);
    assert!(matches!(&events[0], StoreEvent::MessageAdded { branch, .. } if branch == MAIN_BRANCH));
    assert!(matches!(&events[1], StoreEvent::BranchCreated { branch } if branch.name == "alt"));
    assert!(
        matches!(&events[2], StoreEvent::BranchSwitched { from, to } if from == MAIN_BRANCH && to == "alt")
    );
    assert!(matches!(&events[3], StoreEvent::CheckpointCreated { name } if name == "c1"));

    let event = messages.recv_timeout(Duration::from_millis(100)).unwrap();
    assert!(matches!(event, StoreEvent::MessageAdded { .. }));
    assert!(messages.try_recv().is_err());
}

#[test]
fn test_branch_filtered_subscription() {
    let store = test_store();
    store.create_branch("watched", None, CreateBranchOptions::default()).unwrap();
    store.create_branch("ignored", None, CreateBranchOptions::default()).unwrap();

    let handle = store.subscribe(SubscriptionFilter::all().on_branches(vec!["watched".into()]));

    store.switch_branch("ignored").unwrap();
    store.add_message(MessageInput::user("noise"));
    store.switch_branch("watched").unwrap();
    store.add_message(MessageInput::user("signal"));

    let events = handle.drain();
    // Switch into "watched" plus the message added there
    assert_eq!(events.len(), 2);
    match &events[1] {
        StoreEvent::MessageAdded { message, .. } => assert_eq!(message.content, "signal"),
        other => panic!("Expected MessageAdded, got {:?}", other),
    }
}

#[test]
fn test_unsubscribe() {
    let store = test_store();
    let handle = store.subscribe(SubscriptionFilter::all());
    assert_eq!(store.stats().subscription_count, 1);

    assert!(store.unsubscribe(handle.id));
    assert_eq!(store.stats().subscription_count, 0);

    store.add_message(MessageInput::user("unseen"));
    let events = handle.drain();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], StoreEvent::Dropped { .. }));
}

#[test]
fn test_independent_stores() {
    let a = test_store();
    let b = test_store();

    a.create_branch("only-in-a", None, CreateBranchOptions::default()).unwrap();
    assert_eq!(a.branch_count(), 2);
    assert_eq!(b.branch_count(), 1);
}
