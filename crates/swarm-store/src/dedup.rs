//! Duplicate detection over recent tool turns.
//!
//! `args_hash` and `normalized_filename` are precomputed at ingest time,
//! so the scan here is a linear pass over tool-metadata rows rather than
//! a JSON parse per candidate.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tracing::debug;

use swarm_core::{PreservationPolicy, ToolKind};

use crate::error::{Result, StoreError};
use crate::types::{InvocationRecord, Turn};

/// Tool `run_bash` counts as a mutator in every scan, whatever its
/// declared kind.
const ALWAYS_MUTATING_TOOL: &str = "run_bash";

/// Dedup-relevant slice of a tool's registry entry.
#[derive(Debug, Clone, Copy)]
pub struct ToolProfile {
    pub kind: ToolKind,
    pub policy: PreservationPolicy,
}

/// Compact base64 MD5 of the argument string, with `=` padding stripped.
/// Blank or `{}` arguments hash to the empty string.
pub fn compute_args_hash(args_str: &str) -> String {
    let stripped = args_str.trim();
    if stripped.is_empty() || stripped == "{}" {
        return String::new();
    }
    let digest = md5::compute(args_str.as_bytes());
    BASE64.encode(digest.0).trim_end_matches('=').to_string()
}

/// Best-effort lowercased canonical file key from an argument blob.
///
/// Looks for the usual file-bearing argument names; returns the empty
/// string when none is present or the blob is not a JSON object.
pub fn normalized_file_key(args_str: &str) -> String {
    const FILE_KEYS: [&str; 5] = ["filename", "file", "path", "file_path", "target_file"];

    let Ok(value) = serde_json::from_str::<serde_json::Value>(args_str) else {
        return String::new();
    };
    let Some(obj) = value.as_object() else {
        return String::new();
    };
    for key in FILE_KEYS {
        if let Some(v) = obj.get(key).and_then(|v| v.as_str()) {
            return v.trim().to_ascii_lowercase();
        }
    }
    String::new()
}

/// Check whether invoking `tool_name` with `args_str` in `current_turn`
/// duplicates an earlier live invocation. Returns the duplicate's turn
/// index, or `None`.
///
/// `invocation_log` is the external log consulted by the `until-build`
/// policy; `profiles` maps every registered tool to its kind and policy.
pub fn check_duplicate(
    turns: &[Turn],
    current_turn: i64,
    tool_name: &str,
    args_str: &str,
    invocation_log: &[InvocationRecord],
    profiles: &HashMap<String, ToolProfile>,
) -> Result<Option<i64>> {
    let profile = profiles.get(tool_name).ok_or_else(|| StoreError::UnknownTool {
        name: tool_name.to_string(),
    })?;

    let current_hash = compute_args_hash(args_str);
    let normalized_key = normalized_file_key(args_str);

    debug!(
        tool = tool_name,
        turn = current_turn,
        policy = %profile.policy,
        kind = profile.kind.as_str(),
        hash = %current_hash,
        norm = %normalized_key,
        "dedup scan"
    );

    // "until-build" consults the external invocation log, anchored on the
    // last accepted turn of the same tool.
    if profile.policy == PreservationPolicy::UntilBuild {
        if let Some(last) = last_accepted_turn(turns, current_turn, tool_name) {
            if !has_intervening_mutators(
                turns,
                last.turn_idx,
                current_turn,
                &normalized_key,
                profiles,
            )? {
                for inv in invocation_log {
                    if inv.tool_name != tool_name {
                        continue;
                    }
                    if inv.status.starts_with("reject") {
                        continue;
                    }
                    if inv.args_hash == current_hash {
                        debug!(duplicate = inv.turn, "duplicate (until-build)");
                        return Ok(Some(inv.turn));
                    }
                }
            }
        }
        return Ok(None);
    }

    // Other policies: scan history turns newest-first.
    let mut candidate: Option<&Turn> = None;
    for turn in turns.iter().rev() {
        if turn.turn_idx >= current_turn {
            continue;
        }
        if !turn.is_live_tool_turn() {
            continue;
        }
        let Some(tm) = &turn.tool_meta else { continue };
        if tm.tool_name != tool_name {
            continue;
        }

        // Match by args hash when present, else by normalised file key.
        if !current_hash.is_empty() && tm.args_hash == current_hash {
            candidate = Some(turn);
            break;
        }
        if current_hash.is_empty()
            && !normalized_key.is_empty()
            && tm.normalized_filename.trim().to_ascii_lowercase() == normalized_key
        {
            candidate = Some(turn);
            break;
        }
    }

    let Some(candidate) = candidate else {
        return Ok(None);
    };

    // Non-mutating tools: a mutator between the candidate and now breaks
    // the match.
    if !profile.kind.is_mutating()
        && has_intervening_mutators(
            turns,
            candidate.turn_idx,
            current_turn,
            &normalized_key,
            profiles,
        )?
    {
        debug!(candidate = candidate.turn_idx, "mutator intervened; not a duplicate");
        return Ok(None);
    }

    debug!(duplicate = candidate.turn_idx, "duplicate found");
    Ok(Some(candidate.turn_idx))
}

/// Last live turn of `tool_name` strictly before `current_turn`.
fn last_accepted_turn<'a>(
    turns: &'a [Turn],
    current_turn: i64,
    tool_name: &str,
) -> Option<&'a Turn> {
    turns.iter().rev().find(|turn| {
        turn.turn_idx < current_turn
            && turn.is_live_tool_turn()
            && turn
                .tool_meta
                .as_ref()
                .is_some_and(|tm| tm.tool_name == tool_name)
    })
}

/// True when any mutating tool turn lies strictly between `start_turn`
/// and `current_turn`. `run_bash` always counts; other mutating tools
/// count only when they operated on the same normalised file key.
fn has_intervening_mutators(
    turns: &[Turn],
    start_turn: i64,
    current_turn: i64,
    normalized_key: &str,
    profiles: &HashMap<String, ToolProfile>,
) -> Result<bool> {
    for turn in turns {
        if turn.turn_idx <= start_turn || turn.turn_idx >= current_turn {
            continue;
        }
        if !turn.is_live_tool_turn() {
            continue;
        }
        let Some(tm) = &turn.tool_meta else { continue };
        if tm.tool_name.is_empty() {
            continue;
        }

        if tm.tool_name == ALWAYS_MUTATING_TOOL {
            debug!(turn = turn.turn_idx, "intervening mutator (run_bash)");
            return Ok(true);
        }

        let profile = profiles
            .get(&tm.tool_name)
            .ok_or_else(|| StoreError::UnknownTool {
                name: tm.tool_name.clone(),
            })?;
        if profile.kind.is_mutating() {
            let mut_key = tm.normalized_filename.trim().to_ascii_lowercase();
            if mut_key == normalized_key {
                debug!(
                    turn = turn.turn_idx,
                    tool = %tm.tool_name,
                    file = %mut_key,
                    "intervening mutator on same file"
                );
                return Ok(true);
            }
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Message, ToolMeta};
    use swarm_core::{MessageRole, ToolStatus};

    fn profiles() -> HashMap<String, ToolProfile> {
        let mut m = HashMap::new();
        m.insert(
            "read_file".to_string(),
            ToolProfile {
                kind: ToolKind::ReadOnly,
                policy: PreservationPolicy::OneTime,
            },
        );
        m.insert(
            "write_file".to_string(),
            ToolProfile {
                kind: ToolKind::Mutating,
                policy: PreservationPolicy::Always,
            },
        );
        m.insert(
            "run_bash".to_string(),
            ToolProfile {
                kind: ToolKind::Mutating,
                policy: PreservationPolicy::Always,
            },
        );
        m
    }

    fn tool_turn(turn_idx: i64, tool: &str, args: &str) -> Turn {
        let mut turn = Turn::new(turn_idx);
        let mut tm = ToolMeta::new(tool);
        tm.status = Some(ToolStatus::Success);
        tm.args_hash = compute_args_hash(args);
        tm.normalized_filename = normalized_file_key(args);
        tm.input_args = serde_json::from_str(args).unwrap_or_default();
        turn.tool_meta = Some(tm);
        turn.push_message(Message::new(MessageRole::Tool, "ok", turn_idx));
        turn
    }

    #[test]
    fn hash_is_empty_for_blank_args() {
        assert_eq!(compute_args_hash(""), "");
        assert_eq!(compute_args_hash("  {} "), "");
        assert_ne!(compute_args_hash(r#"{"path":"/a.txt"}"#), "");
    }

    #[test]
    fn hash_has_no_padding() {
        let h = compute_args_hash(r#"{"path":"/a.txt"}"#);
        assert!(!h.ends_with('='));
    }

    #[test]
    fn file_key_extraction() {
        assert_eq!(normalized_file_key(r#"{"path":"/A.TXT "}"#), "/a.txt");
        assert_eq!(normalized_file_key(r#"{"depth":3}"#), "");
        assert_eq!(normalized_file_key("not json"), "");
    }

    #[test]
    fn repeat_read_is_duplicate() {
        let args = r#"{"path":"/a.txt"}"#;
        let turns = vec![tool_turn(5, "read_file", args)];
        let dup = check_duplicate(&turns, 6, "read_file", args, &[], &profiles()).unwrap();
        assert_eq!(dup, Some(5));
    }

    #[test]
    fn mutator_on_same_file_breaks_duplicate() {
        let args = r#"{"path":"/a.txt"}"#;
        let turns = vec![
            tool_turn(5, "read_file", args),
            tool_turn(6, "write_file", args),
        ];
        let dup = check_duplicate(&turns, 7, "read_file", args, &[], &profiles()).unwrap();
        assert_eq!(dup, None);
    }

    #[test]
    fn mutator_on_other_file_keeps_duplicate() {
        let read = r#"{"path":"/a.txt"}"#;
        let turns = vec![
            tool_turn(5, "read_file", read),
            tool_turn(6, "write_file", r#"{"path":"/b.txt"}"#),
        ];
        let dup = check_duplicate(&turns, 7, "read_file", read, &[], &profiles()).unwrap();
        assert_eq!(dup, Some(5));
    }

    #[test]
    fn run_bash_always_breaks_duplicate() {
        let args = r#"{"path":"/a.txt"}"#;
        let turns = vec![
            tool_turn(5, "read_file", args),
            tool_turn(6, "run_bash", r#"{"cmd":"make"}"#),
        ];
        let dup = check_duplicate(&turns, 7, "read_file", args, &[], &profiles()).unwrap();
        assert_eq!(dup, None);
    }

    #[test]
    fn rejected_turns_are_skipped() {
        let args = r#"{"path":"/a.txt"}"#;
        let mut rejected = tool_turn(5, "read_file", args);
        rejected.tool_meta.as_mut().unwrap().rejection = Some("duplicate of turn 3".into());
        let dup = check_duplicate(&[rejected], 6, "read_file", args, &[], &profiles()).unwrap();
        assert_eq!(dup, None);
    }

    #[test]
    fn unknown_tool_is_an_error() {
        let err = check_duplicate(&[], 1, "nope", "{}", &[], &profiles());
        assert!(matches!(err, Err(StoreError::UnknownTool { .. })));
    }
}
