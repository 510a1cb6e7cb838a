use rusqlite::Connection;

use crate::error::Result;

/// Initialise all agents-and-turns tables in one SQLite file.
///
/// Safe to call on every startup; uses `IF NOT EXISTS` throughout.
/// Foreign keys are composite on `(repo_url, agent_role, agent_id,
/// turn_idx)` so deleting a turn cascades to its tool metadata and
/// messages.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 30000;

        CREATE TABLE IF NOT EXISTS agents_running (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            agent_role  TEXT NOT NULL,
            agent_id    TEXT NOT NULL,
            repo_url    TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_agents_repo
            ON agents_running(repo_url);

        CREATE TABLE IF NOT EXISTS turns (
            repo_url          TEXT    NOT NULL,
            agent_role        TEXT    NOT NULL,
            agent_id          TEXT    NOT NULL,
            turn_idx          INTEGER NOT NULL,
            total_char_count  INTEGER NOT NULL,
            finalized         INTEGER NOT NULL DEFAULT 0 CHECK(finalized IN (0,1)),
            invocation_reason TEXT,
            turns_to_purge    TEXT,
            PRIMARY KEY(repo_url, agent_role, agent_id, turn_idx)
        );

        CREATE TABLE IF NOT EXISTS tool_meta (
            repo_url             TEXT    NOT NULL,
            agent_role           TEXT    NOT NULL,
            agent_id             TEXT    NOT NULL,
            turn_idx             INTEGER NOT NULL,
            tool_name            TEXT,
            execution_time       REAL,
            pending_deletion     INTEGER NOT NULL CHECK(pending_deletion IN (0,1)),
            deleted              INTEGER NOT NULL CHECK(deleted IN (0,1)),
            rejection            TEXT,
            status               TEXT,
            args_hash            TEXT,
            preservation_policy  TEXT,
            normalized_args_json TEXT    NOT NULL,
            normalized_filename  TEXT,
            input_args_json      TEXT    NOT NULL,
            PRIMARY KEY(repo_url, agent_role, agent_id, turn_idx),
            FOREIGN KEY(repo_url, agent_role, agent_id, turn_idx)
              REFERENCES turns(repo_url, agent_role, agent_id, turn_idx)
              ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS messages (
            repo_url            TEXT    NOT NULL,
            agent_role          TEXT    NOT NULL,
            agent_id            TEXT    NOT NULL,
            turn_idx            INTEGER NOT NULL,
            message_idx         INTEGER NOT NULL,
            role                TEXT    NOT NULL,
            content             TEXT    NOT NULL,
            timestamp           TEXT    NOT NULL,
            original_message_id INTEGER NOT NULL,
            char_count          INTEGER NOT NULL,
            raw_json            TEXT,
            PRIMARY KEY(repo_url, agent_role, agent_id, turn_idx, message_idx),
            FOREIGN KEY(repo_url, agent_role, agent_id, turn_idx)
              REFERENCES turns(repo_url, agent_role, agent_id, turn_idx)
              ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS agent_state (
            repo_url        TEXT    NOT NULL,
            agent_role      TEXT    NOT NULL,
            agent_id        TEXT    NOT NULL,
            last_turn_idx   INTEGER NOT NULL DEFAULT -1,
            last_message_id INTEGER NOT NULL DEFAULT -1,
            PRIMARY KEY(repo_url, agent_role, agent_id)
        );

        CREATE TABLE IF NOT EXISTS conversation_metadata (
            repo_url   TEXT NOT NULL,
            agent_role TEXT NOT NULL,
            agent_id   TEXT NOT NULL,
            metadata   TEXT NOT NULL,
            PRIMARY KEY(repo_url, agent_role, agent_id)
        );",
    )?;
    Ok(())
}
