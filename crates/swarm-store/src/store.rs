use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, instrument};

use swarm_core::{AgentKey, MessageRole, PreservationPolicy, ToolStatus};

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::types::{
    AppendResult, Message, RunningAgent, SortField, SortOrder, ToolMeta, Turn, TurnFilter,
};

/// Thread-safe handle over the single SQLite file holding turns,
/// messages, tool metadata, counters, running agents, and conversation
/// metadata.
///
/// Wraps one connection in a `Mutex`; writes for the same conversation
/// are thereby serialised, and the `busy_timeout` pragma absorbs
/// contention from other handles on the same file.
pub struct ConversationStore {
    db: Mutex<Connection>,
}

impl ConversationStore {
    /// Open (creating directories and tables as needed) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    // ------------------------------------------------------------------
    // Monotonic counters
    // ------------------------------------------------------------------

    /// Atomically read & bump `last_turn_idx`, preserving `last_message_id`.
    /// Returns the newly allocated turn index (starting at 0).
    #[instrument(skip(self), fields(key = %key))]
    pub fn allocate_next_turn_idx(&self, key: &AgentKey) -> Result<i64> {
        let db = self.db.lock().unwrap();
        let (last_turn, last_msg) = read_state(&db, key)?;
        let next = last_turn + 1;
        upsert_state(&db, key, next, last_msg)?;
        Ok(next)
    }

    /// Atomically read & bump `last_message_id`, preserving `last_turn_idx`.
    /// Returns the newly allocated message id (starting at 0).
    #[instrument(skip(self), fields(key = %key))]
    pub fn allocate_next_message_id(&self, key: &AgentKey) -> Result<i64> {
        let db = self.db.lock().unwrap();
        let (last_turn, last_msg) = read_state(&db, key)?;
        let next = last_msg + 1;
        upsert_state(&db, key, last_turn, next)?;
        Ok(next)
    }

    /// `(last_turn_idx, last_message_id)`, or `(-1, -1)` before the first
    /// allocation.
    pub fn load_state(&self, key: &AgentKey) -> Result<(i64, i64)> {
        let db = self.db.lock().unwrap();
        read_state(&db, key)
    }

    // ------------------------------------------------------------------
    // Turns
    // ------------------------------------------------------------------

    /// Load the whole conversation, ascending by `turn_idx`, each turn
    /// rehydrated with its tool metadata and ordered messages.
    #[instrument(skip(self), fields(key = %key))]
    pub fn load_turns(&self, key: &AgentKey) -> Result<Vec<Turn>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT turn_idx FROM turns
             WHERE repo_url=?1 AND agent_role=?2 AND agent_id=?3
             ORDER BY turn_idx ASC",
        )?;
        let indices: Vec<i64> = stmt
            .query_map(
                params![key.repo_url, key.agent_role, key.agent_id],
                |row| row.get(0),
            )?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);

        indices
            .into_iter()
            .map(|idx| load_turn(&db, key, idx))
            .collect()
    }

    /// Page and filter over the denormalised join of turns and tool
    /// metadata. `limit = None` means unbounded.
    #[instrument(skip(self, filter), fields(key = %key))]
    pub fn query_turns(
        &self,
        key: &AgentKey,
        filter: &TurnFilter,
        sort: SortField,
        order: SortOrder,
        limit: Option<u32>,
        offset: u32,
    ) -> Result<Vec<Turn>> {
        let db = self.db.lock().unwrap();

        let mut sql = String::from(
            "SELECT t.turn_idx FROM turns t
             LEFT JOIN tool_meta m
               ON  m.repo_url   = t.repo_url
               AND m.agent_role = t.agent_role
               AND m.agent_id   = t.agent_id
               AND m.turn_idx   = t.turn_idx
             WHERE t.repo_url=?1 AND t.agent_role=?2 AND t.agent_id=?3",
        );
        let mut binds: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(key.repo_url.clone()),
            Box::new(key.agent_role.clone()),
            Box::new(key.agent_id.clone()),
        ];

        if let Some(status) = filter.status {
            sql.push_str(&format!(" AND m.status = ?{}", binds.len() + 1));
            binds.push(Box::new(status.as_str().to_string()));
        }
        if let Some(tool_name) = &filter.tool_name {
            sql.push_str(&format!(" AND m.tool_name = ?{}", binds.len() + 1));
            binds.push(Box::new(tool_name.clone()));
        }
        if let Some(deleted) = filter.deleted {
            sql.push_str(&format!(" AND m.deleted = ?{}", binds.len() + 1));
            binds.push(Box::new(deleted as i64));
        }
        if filter.since.is_some() || filter.until.is_some() {
            let since = filter.since.clone().unwrap_or_default();
            // RFC3339 compares lexicographically; "~" sorts above any digit.
            let until = filter.until.clone().unwrap_or_else(|| "~".to_string());
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM messages msg
                   WHERE msg.repo_url = t.repo_url
                     AND msg.agent_role = t.agent_role
                     AND msg.agent_id = t.agent_id
                     AND msg.turn_idx = t.turn_idx
                     AND msg.timestamp >= ?{} AND msg.timestamp <= ?{})",
                binds.len() + 1,
                binds.len() + 2
            ));
            binds.push(Box::new(since));
            binds.push(Box::new(until));
        }

        sql.push_str(&format!(
            " ORDER BY {} {}, t.turn_idx ASC LIMIT ?{} OFFSET ?{}",
            sort.column(),
            order.keyword(),
            binds.len() + 1,
            binds.len() + 2
        ));
        binds.push(Box::new(limit.map(|l| l as i64).unwrap_or(-1)));
        binds.push(Box::new(offset as i64));

        let mut stmt = db.prepare(&sql)?;
        let indices: Vec<i64> = stmt
            .query_map(
                rusqlite::params_from_iter(binds.iter().map(|b| b.as_ref())),
                |row| row.get(0),
            )?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);

        indices
            .into_iter()
            .map(|idx| load_turn(&db, key, idx))
            .collect()
    }

    /// Transactionally replace the conversation with `turns`, cascading
    /// to tool metadata and messages. Never re-allocates ids; the
    /// counters are only ever bumped upward so they stay the global
    /// ordering source of truth.
    #[instrument(skip(self, turns), fields(key = %key, turns = turns.len()))]
    pub fn save_turns(&self, key: &AgentKey, turns: &[Turn]) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;

        tx.execute(
            "DELETE FROM turns WHERE repo_url=?1 AND agent_role=?2 AND agent_id=?3",
            params![key.repo_url, key.agent_role, key.agent_id],
        )?;

        for turn in turns {
            insert_turn(&tx, key, turn)?;
        }

        let max_turn = turns.iter().map(|t| t.turn_idx).max().unwrap_or(-1);
        let max_msg = turns
            .iter()
            .flat_map(|t| t.messages.iter())
            .map(|m| m.original_message_id)
            .max()
            .unwrap_or(-1);
        let (last_turn, last_msg) = read_state(&tx, key)?;
        upsert_state(&tx, key, last_turn.max(max_turn), last_msg.max(max_msg))?;

        tx.commit()?;
        debug!(turns = turns.len(), "conversation saved");
        Ok(())
    }

    /// Drop the conversation entirely: turns (cascading to tool metadata
    /// and messages), counters, and conversation metadata.
    #[instrument(skip(self), fields(key = %key))]
    pub fn delete_conversation(&self, key: &AgentKey) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        tx.execute(
            "DELETE FROM turns WHERE repo_url=?1 AND agent_role=?2 AND agent_id=?3",
            params![key.repo_url, key.agent_role, key.agent_id],
        )?;
        tx.execute(
            "DELETE FROM agent_state WHERE repo_url=?1 AND agent_role=?2 AND agent_id=?3",
            params![key.repo_url, key.agent_role, key.agent_id],
        )?;
        tx.execute(
            "DELETE FROM conversation_metadata WHERE repo_url=?1 AND agent_role=?2 AND agent_id=?3",
            params![key.repo_url, key.agent_role, key.agent_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Append `contents` as one new turn of `role`-tagged messages with
    /// freshly allocated monotonic ids.
    #[instrument(skip(self, contents), fields(key = %key, role = %role, n = contents.len()))]
    pub fn append_messages(
        &self,
        key: &AgentKey,
        role: MessageRole,
        contents: &[String],
    ) -> Result<AppendResult> {
        if contents.is_empty() {
            return Err(StoreError::InvalidValue(
                "append_messages requires at least one message".into(),
            ));
        }

        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;

        let (last_turn, last_msg) = read_state(&tx, key)?;
        let turn_idx = last_turn + 1;

        let mut turn = Turn::new(turn_idx);
        turn.finalized = true;
        let mut message_ids = Vec::with_capacity(contents.len());
        for (offset, content) in contents.iter().enumerate() {
            let id = last_msg + 1 + offset as i64;
            message_ids.push(id);
            turn.push_message(Message::new(role, content.clone(), id));
        }

        insert_turn(&tx, key, &turn)?;
        upsert_state(&tx, key, turn_idx, last_msg + contents.len() as i64)?;
        tx.commit()?;

        Ok(AppendResult {
            turn_idx,
            message_ids,
        })
    }

    // ------------------------------------------------------------------
    // Conversation metadata
    // ------------------------------------------------------------------

    /// The conversation's open-ended metadata object (empty when unset).
    pub fn get_metadata(&self, key: &AgentKey) -> Result<serde_json::Value> {
        let db = self.db.lock().unwrap();
        let raw: Option<String> = db
            .query_row(
                "SELECT metadata FROM conversation_metadata
                 WHERE repo_url=?1 AND agent_role=?2 AND agent_id=?3",
                params![key.repo_url, key.agent_role, key.agent_id],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(s) => Ok(serde_json::from_str(&s)?),
            None => Ok(serde_json::Value::Object(Default::default())),
        }
    }

    /// Set one field of the conversation metadata object, creating the
    /// row as needed.
    #[instrument(skip(self, value), fields(key = %key, field))]
    pub fn update_metadata(
        &self,
        key: &AgentKey,
        field: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        let mut metadata = self.get_metadata(key)?;
        if !metadata.is_object() {
            metadata = serde_json::Value::Object(Default::default());
        }
        metadata
            .as_object_mut()
            .ok_or_else(|| StoreError::InvalidValue("metadata is not an object".into()))?
            .insert(field.to_string(), value);

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO conversation_metadata (repo_url, agent_role, agent_id, metadata)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(repo_url, agent_role, agent_id)
             DO UPDATE SET metadata = excluded.metadata",
            params![
                key.repo_url,
                key.agent_role,
                key.agent_id,
                serde_json::to_string(&metadata)?
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Running agents
    // ------------------------------------------------------------------

    /// Register an agent row, reusing an existing one for the same key.
    #[instrument(skip(self), fields(key = %key))]
    pub fn add_agent(&self, key: &AgentKey) -> Result<()> {
        let db = self.db.lock().unwrap();
        let exists: Option<i64> = db
            .query_row(
                "SELECT id FROM agents_running
                 WHERE agent_role=?1 AND agent_id=?2 AND repo_url=?3",
                params![key.agent_role, key.agent_id, key.repo_url],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            db.execute(
                "INSERT INTO agents_running (agent_role, agent_id, repo_url, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    key.agent_role,
                    key.agent_id,
                    key.repo_url,
                    chrono::Utc::now().to_rfc3339()
                ],
            )?;
            debug!("agent registered");
        }
        Ok(())
    }

    pub fn agent_exists(&self, key: &AgentKey) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let exists: Option<i64> = db
            .query_row(
                "SELECT id FROM agents_running
                 WHERE agent_role=?1 AND agent_id=?2 AND repo_url=?3",
                params![key.agent_role, key.agent_id, key.repo_url],
                |row| row.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    /// All registered agents, optionally scoped to one repo, in
    /// registration order.
    pub fn list_agents(&self, repo_url: Option<&str>) -> Result<Vec<RunningAgent>> {
        let db = self.db.lock().unwrap();
        let map = |row: &rusqlite::Row<'_>| -> rusqlite::Result<RunningAgent> {
            Ok(RunningAgent {
                agent_role: row.get(0)?,
                agent_id: row.get(1)?,
                repo_url: row.get(2)?,
                created_at: row.get(3)?,
            })
        };
        let agents = match repo_url {
            Some(repo) => {
                let mut stmt = db.prepare(
                    "SELECT agent_role, agent_id, repo_url, created_at
                     FROM agents_running WHERE repo_url=?1 ORDER BY id",
                )?;
                let rows = stmt.query_map(params![repo], map)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = db.prepare(
                    "SELECT agent_role, agent_id, repo_url, created_at
                     FROM agents_running ORDER BY id",
                )?;
                let rows = stmt.query_map([], map)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(agents)
    }

    /// Delete the agent row. The conversation itself is purged separately
    /// by [`ConversationStore::delete_conversation`].
    #[instrument(skip(self), fields(key = %key))]
    pub fn remove_agent(&self, key: &AgentKey) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "DELETE FROM agents_running
             WHERE agent_role=?1 AND agent_id=?2 AND repo_url=?3",
            params![key.agent_role, key.agent_id, key.repo_url],
        )?;
        if n == 0 {
            return Err(StoreError::AgentNotFound {
                key: key.to_string(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row-level helpers (run under the connection lock)
// ---------------------------------------------------------------------------

fn read_state(db: &Connection, key: &AgentKey) -> Result<(i64, i64)> {
    let row: Option<(i64, i64)> = db
        .query_row(
            "SELECT last_turn_idx, last_message_id FROM agent_state
             WHERE repo_url=?1 AND agent_role=?2 AND agent_id=?3",
            params![key.repo_url, key.agent_role, key.agent_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(row.unwrap_or((-1, -1)))
}

fn upsert_state(db: &Connection, key: &AgentKey, last_turn: i64, last_msg: i64) -> Result<()> {
    db.execute(
        "INSERT INTO agent_state
           (repo_url, agent_role, agent_id, last_turn_idx, last_message_id)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(repo_url, agent_role, agent_id) DO UPDATE SET
           last_turn_idx   = excluded.last_turn_idx,
           last_message_id = excluded.last_message_id",
        params![key.repo_url, key.agent_role, key.agent_id, last_turn, last_msg],
    )?;
    Ok(())
}

fn insert_turn(db: &Connection, key: &AgentKey, turn: &Turn) -> Result<()> {
    db.execute(
        "INSERT INTO turns
           (repo_url, agent_role, agent_id, turn_idx, total_char_count,
            finalized, invocation_reason, turns_to_purge)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            key.repo_url,
            key.agent_role,
            key.agent_id,
            turn.turn_idx,
            turn.total_char_count,
            turn.finalized as i64,
            turn.invocation_reason,
            turn.turns_to_purge,
        ],
    )?;

    if let Some(tm) = &turn.tool_meta {
        db.execute(
            "INSERT INTO tool_meta
               (repo_url, agent_role, agent_id, turn_idx, tool_name, execution_time,
                pending_deletion, deleted, rejection, status, args_hash,
                preservation_policy, normalized_args_json, normalized_filename,
                input_args_json)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
            params![
                key.repo_url,
                key.agent_role,
                key.agent_id,
                turn.turn_idx,
                tm.tool_name,
                tm.execution_time,
                tm.pending_deletion as i64,
                tm.deleted as i64,
                tm.rejection,
                tm.status.map(|s| s.as_str().to_string()),
                tm.args_hash,
                tm.preservation_policy.map(|p| p.as_str().to_string()),
                serde_json::to_string(&tm.normalized_args)?,
                tm.normalized_filename,
                serde_json::to_string(&tm.input_args)?,
            ],
        )?;
    }

    for (message_idx, msg) in turn.messages.iter().enumerate() {
        let raw_json = msg
            .raw
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        db.execute(
            "INSERT INTO messages
               (repo_url, agent_role, agent_id, turn_idx, message_idx, role,
                content, timestamp, original_message_id, char_count, raw_json)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            params![
                key.repo_url,
                key.agent_role,
                key.agent_id,
                turn.turn_idx,
                message_idx as i64,
                msg.role.as_str(),
                msg.content,
                msg.timestamp,
                msg.original_message_id,
                msg.char_count,
                raw_json,
            ],
        )?;
    }

    Ok(())
}

fn load_turn(db: &Connection, key: &AgentKey, turn_idx: i64) -> Result<Turn> {
    let (total_char_count, finalized, invocation_reason, turns_to_purge): (
        i64,
        i64,
        Option<String>,
        Option<String>,
    ) = db.query_row(
        "SELECT total_char_count, finalized, invocation_reason, turns_to_purge
         FROM turns
         WHERE repo_url=?1 AND agent_role=?2 AND agent_id=?3 AND turn_idx=?4",
        params![key.repo_url, key.agent_role, key.agent_id, turn_idx],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    )?;

    let tool_meta = load_tool_meta(db, key, turn_idx)?;
    let messages = load_messages(db, key, turn_idx)?;

    Ok(Turn {
        turn_idx,
        total_char_count,
        finalized: finalized != 0,
        invocation_reason,
        turns_to_purge,
        tool_meta,
        messages,
    })
}

fn load_tool_meta(db: &Connection, key: &AgentKey, turn_idx: i64) -> Result<Option<ToolMeta>> {
    type ToolMetaRow = (
        Option<String>,
        Option<f64>,
        i64,
        i64,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
    );
    let row: Option<ToolMetaRow> = db
        .query_row(
            "SELECT tool_name, execution_time, pending_deletion, deleted, rejection,
                    status, args_hash, preservation_policy, normalized_args_json,
                    normalized_filename, input_args_json
             FROM tool_meta
             WHERE repo_url=?1 AND agent_role=?2 AND agent_id=?3 AND turn_idx=?4",
            params![key.repo_url, key.agent_role, key.agent_id, turn_idx],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                    row.get(9)?,
                    row.get(10)?,
                ))
            },
        )
        .optional()?;

    let Some((
        tool_name,
        execution_time,
        pending_deletion,
        deleted,
        rejection,
        status,
        args_hash,
        preservation_policy,
        normalized_args_json,
        normalized_filename,
        input_args_json,
    )) = row
    else {
        return Ok(None);
    };

    let status = status
        .as_deref()
        .map(ToolStatus::from_str)
        .transpose()
        .map_err(|e| StoreError::InvalidValue(e.to_string()))?;
    let preservation_policy = preservation_policy
        .as_deref()
        .map(PreservationPolicy::from_str)
        .transpose()
        .map_err(|e| StoreError::InvalidValue(e.to_string()))?;

    Ok(Some(ToolMeta {
        tool_name: tool_name.unwrap_or_default(),
        execution_time: execution_time.unwrap_or(0.0),
        pending_deletion: pending_deletion != 0,
        deleted: deleted != 0,
        rejection,
        status,
        args_hash: args_hash.unwrap_or_default(),
        preservation_policy,
        normalized_args: normalized_args_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or(serde_json::Value::Object(Default::default())),
        normalized_filename: normalized_filename.unwrap_or_default(),
        input_args: input_args_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or(serde_json::Value::Object(Default::default())),
    }))
}

fn load_messages(db: &Connection, key: &AgentKey, turn_idx: i64) -> Result<Vec<Message>> {
    let mut stmt = db.prepare(
        "SELECT role, content, timestamp, original_message_id, char_count, raw_json
         FROM messages
         WHERE repo_url=?1 AND agent_role=?2 AND agent_id=?3 AND turn_idx=?4
         ORDER BY message_idx ASC",
    )?;
    type MessageRow = (String, String, String, i64, i64, Option<String>);
    let rows: Vec<MessageRow> = stmt
        .query_map(
            params![key.repo_url, key.agent_role, key.agent_id, turn_idx],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            },
        )?
        .collect::<rusqlite::Result<_>>()?;

    rows.into_iter()
        .map(
            |(role, content, timestamp, original_message_id, char_count, raw_json)| {
                Ok(Message {
                    role: MessageRole::from_str(&role)
                        .map_err(|e| StoreError::InvalidValue(e.to_string()))?,
                    content,
                    timestamp,
                    original_message_id,
                    char_count,
                    raw: raw_json.as_deref().map(serde_json::from_str).transpose()?,
                })
            },
        )
        .collect()
}
