use swarm_core::{AgentKey, MessageRole, PreservationPolicy, ToolStatus};
use swarm_store::{
    compute_args_hash, ConversationStore, Message, SortField, SortOrder, ToolMeta, Turn,
    TurnFilter,
};

fn key() -> AgentKey {
    AgentKey::new("tester", "agent-1", "https://example.com/repo.git")
}

fn sample_turns(store: &ConversationStore, key: &AgentKey) -> Vec<Turn> {
    let mut turns = Vec::new();

    let mut t0 = Turn::new(store.allocate_next_turn_idx(key).unwrap());
    t0.finalized = true;
    t0.push_message(Message::new(
        MessageRole::System,
        "Always respond with a valid json object.",
        store.allocate_next_message_id(key).unwrap(),
    ));
    t0.push_message(Message::new(
        MessageRole::Developer,
        "You fix build failures.",
        store.allocate_next_message_id(key).unwrap(),
    ));
    turns.push(t0);

    let mut t1 = Turn::new(store.allocate_next_turn_idx(key).unwrap());
    t1.push_message(
        Message::new(
            MessageRole::Assistant,
            "reading the file",
            store.allocate_next_message_id(key).unwrap(),
        )
        .with_raw(serde_json::json!({
            "role": "assistant",
            "content": "reading the file",
            "tool_calls": [{"id": "call_1", "function": {"name": "read_file"}}],
        })),
    );
    turns.push(t1);

    let mut t2 = Turn::new(store.allocate_next_turn_idx(key).unwrap());
    let args = r#"{"path":"/a.txt"}"#;
    let mut tm = ToolMeta::new("read_file");
    tm.status = Some(ToolStatus::Success);
    tm.execution_time = 0.42;
    tm.args_hash = compute_args_hash(args);
    tm.preservation_policy = Some(PreservationPolicy::OneTime);
    tm.normalized_filename = "/a.txt".into();
    tm.input_args = serde_json::from_str(args).unwrap();
    t2.tool_meta = Some(tm);
    t2.push_message(Message::new(
        MessageRole::Tool,
        "file contents",
        store.allocate_next_message_id(key).unwrap(),
    ));
    turns.push(t2);

    turns
}

#[test]
fn counters_start_at_zero_and_are_monotonic() {
    let store = ConversationStore::open_in_memory().unwrap();
    let key = key();

    assert_eq!(store.load_state(&key).unwrap(), (-1, -1));
    assert_eq!(store.allocate_next_turn_idx(&key).unwrap(), 0);
    assert_eq!(store.allocate_next_turn_idx(&key).unwrap(), 1);
    assert_eq!(store.allocate_next_message_id(&key).unwrap(), 0);
    assert_eq!(store.allocate_next_message_id(&key).unwrap(), 1);
    // The sibling counter is preserved by each allocator.
    assert_eq!(store.load_state(&key).unwrap(), (1, 1));
}

#[test]
fn counters_for_distinct_conversations_are_independent() {
    let store = ConversationStore::open_in_memory().unwrap();
    let a = AgentKey::new("role", "a", "repo");
    let b = AgentKey::new("role", "b", "repo");

    assert_eq!(store.allocate_next_turn_idx(&a).unwrap(), 0);
    assert_eq!(store.allocate_next_turn_idx(&a).unwrap(), 1);
    assert_eq!(store.allocate_next_turn_idx(&b).unwrap(), 0);
}

#[test]
fn save_and_load_round_trip() {
    let store = ConversationStore::open_in_memory().unwrap();
    let key = key();
    let turns = sample_turns(&store, &key);

    store.save_turns(&key, &turns).unwrap();
    let loaded = store.load_turns(&key).unwrap();

    assert_eq!(loaded.len(), turns.len());
    for (saved, loaded) in turns.iter().zip(&loaded) {
        assert_eq!(saved.turn_idx, loaded.turn_idx);
        assert_eq!(saved.finalized, loaded.finalized);
        assert_eq!(saved.total_char_count, loaded.total_char_count);
        assert_eq!(saved.messages.len(), loaded.messages.len());
        for (sm, lm) in saved.messages.iter().zip(&loaded.messages) {
            assert_eq!(sm.role, lm.role);
            assert_eq!(sm.content, lm.content);
            assert_eq!(sm.timestamp, lm.timestamp);
            assert_eq!(sm.original_message_id, lm.original_message_id);
            assert_eq!(sm.raw, lm.raw);
        }
    }
    let tm = loaded[2].tool_meta.as_ref().unwrap();
    assert_eq!(tm.tool_name, "read_file");
    assert_eq!(tm.status, Some(ToolStatus::Success));
    assert_eq!(tm.preservation_policy, Some(PreservationPolicy::OneTime));
    assert_eq!(tm.input_args["path"], "/a.txt");
}

#[test]
fn resave_keeps_allocated_ids_and_counters() {
    let store = ConversationStore::open_in_memory().unwrap();
    let key = key();
    let turns = sample_turns(&store, &key);
    store.save_turns(&key, &turns).unwrap();

    let (last_turn, last_msg) = store.load_state(&key).unwrap();
    // Re-save a pruned history; counters must not go backwards.
    store.save_turns(&key, &turns[..1]).unwrap();
    assert_eq!(store.load_state(&key).unwrap(), (last_turn, last_msg));
    assert_eq!(store.load_turns(&key).unwrap().len(), 1);
}

#[test]
fn append_messages_is_one_turn_with_fresh_ids() {
    let store = ConversationStore::open_in_memory().unwrap();
    let key = key();
    let turns = sample_turns(&store, &key);
    store.save_turns(&key, &turns).unwrap();

    let res = store
        .append_messages(
            &key,
            MessageRole::User,
            &["hello".to_string(), "world".to_string()],
        )
        .unwrap();
    assert_eq!(res.message_ids.len(), 2);
    assert!(res.message_ids[0] < res.message_ids[1]);

    let loaded = store.load_turns(&key).unwrap();
    let appended = loaded.last().unwrap();
    assert_eq!(appended.turn_idx, res.turn_idx);
    assert_eq!(appended.messages.len(), 2);
    assert_eq!(appended.messages[0].content, "hello");
    assert_eq!(appended.messages[1].content, "world");

    let (last_turn, last_msg) = store.load_state(&key).unwrap();
    assert_eq!(last_turn, res.turn_idx);
    assert_eq!(last_msg, *res.message_ids.last().unwrap());
}

#[test]
fn delete_conversation_cascades_and_resets_counters() {
    let store = ConversationStore::open_in_memory().unwrap();
    let key = key();
    let turns = sample_turns(&store, &key);
    store.save_turns(&key, &turns).unwrap();
    store
        .update_metadata(&key, "issue_title", serde_json::json!("build broken"))
        .unwrap();

    store.delete_conversation(&key).unwrap();

    assert!(store.load_turns(&key).unwrap().is_empty());
    assert_eq!(store.load_state(&key).unwrap(), (-1, -1));
    assert_eq!(
        store.get_metadata(&key).unwrap(),
        serde_json::json!({})
    );
    // Allocation starts over from zero.
    assert_eq!(store.allocate_next_turn_idx(&key).unwrap(), 0);
}

#[test]
fn query_turns_filters_and_sorts() {
    let store = ConversationStore::open_in_memory().unwrap();
    let key = key();
    let turns = sample_turns(&store, &key);
    store.save_turns(&key, &turns).unwrap();

    let filter = TurnFilter {
        tool_name: Some("read_file".into()),
        status: Some(ToolStatus::Success),
        ..Default::default()
    };
    let hits = store
        .query_turns(&key, &filter, SortField::TurnIdx, SortOrder::Asc, None, 0)
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].turn_idx, 2);

    let none = store
        .query_turns(
            &key,
            &TurnFilter {
                tool_name: Some("write_file".into()),
                ..Default::default()
            },
            SortField::TurnIdx,
            SortOrder::Asc,
            None,
            0,
        )
        .unwrap();
    assert!(none.is_empty());

    // Sorting on a tool-meta column with paging.
    let paged = store
        .query_turns(
            &key,
            &TurnFilter::default(),
            SortField::TurnIdx,
            SortOrder::Desc,
            Some(1),
            0,
        )
        .unwrap();
    assert_eq!(paged.len(), 1);
    assert_eq!(paged[0].turn_idx, 2);
}

#[test]
fn query_turns_time_window_matches_any_message() {
    let store = ConversationStore::open_in_memory().unwrap();
    let key = key();
    let turns = sample_turns(&store, &key);
    store.save_turns(&key, &turns).unwrap();

    let ts = turns[2].messages[0].timestamp.clone();
    let hits = store
        .query_turns(
            &key,
            &TurnFilter {
                since: Some(ts.clone()),
                until: Some(ts),
                ..Default::default()
            },
            SortField::TurnIdx,
            SortOrder::Asc,
            None,
            0,
        )
        .unwrap();
    assert!(hits.iter().any(|t| t.turn_idx == 2));

    let later = store
        .query_turns(
            &key,
            &TurnFilter {
                since: Some("2999-01-01T00:00:00Z".into()),
                ..Default::default()
            },
            SortField::TurnIdx,
            SortOrder::Asc,
            None,
            0,
        )
        .unwrap();
    assert!(later.is_empty());
}

#[test]
fn agents_register_idempotently_and_remove() {
    let store = ConversationStore::open_in_memory().unwrap();
    let key = key();

    store.add_agent(&key).unwrap();
    store.add_agent(&key).unwrap();
    assert_eq!(store.list_agents(Some(&key.repo_url)).unwrap().len(), 1);
    assert!(store.agent_exists(&key).unwrap());

    store.remove_agent(&key).unwrap();
    assert!(!store.agent_exists(&key).unwrap());
    assert!(store.remove_agent(&key).is_err());
}

#[test]
fn store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agents.db");
    let key = key();

    {
        let store = ConversationStore::open(&path).unwrap();
        let turns = sample_turns(&store, &key);
        store.save_turns(&key, &turns).unwrap();
    }

    let store = ConversationStore::open(&path).unwrap();
    assert_eq!(store.load_turns(&key).unwrap().len(), 3);
    assert_eq!(store.load_state(&key).unwrap().0, 2);
}
