pub mod cancellation;
pub mod config;
pub mod credit;
pub mod dispatcher;
pub mod event_stream;
pub mod persistence;
pub mod planner;
pub mod supervisor;

pub use cancellation::*;
pub use config::*;
pub use credit::*;
pub use dispatcher::*;
pub use event_stream::*;
pub use persistence::*;
pub use planner::Planner;
pub use supervisor::*;

/// Scans for the first balanced `{...}` span, tracking brace depth and skipping
/// braces inside quoted strings so a value like `"say {hi}"` doesn't confuse the
/// scan. Shared by the Planner (plan synthesis) and the Supervisor (per-turn
/// `AgentAction` decoding) — grounded on the same balanced-brace idiom the chat
/// engine lineage uses to pull a tool call out of free-form provider text.
pub(crate) fn extract_first_json_object(input: &str) -> Option<String> {
    let mut start = None;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in input.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => {
                if start.is_none() {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' => {
                if depth == 0 {
                    continue;
                }
                depth -= 1;
                if depth == 0 {
                    let begin = start?;
                    return input.get(begin..=idx).map(str::to_string);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_json_object_wrapped_in_prose() {
        let input = "Sure, here's the plan:\n```json\n{\"goal\": \"x\", \"phases\": []}\n```\nLet me know!";
        let extracted = extract_first_json_object(input).unwrap();
        assert_eq!(extracted, "{\"goal\": \"x\", \"phases\": []}");
    }

    #[test]
    fn braces_inside_quoted_strings_do_not_break_depth_tracking() {
        let input = r#"{"goal": "say {hi} to them", "phases": []}"#;
        let extracted = extract_first_json_object(input).unwrap();
        assert_eq!(extracted, input);
    }

    #[test]
    fn returns_none_when_no_object_present() {
        assert!(extract_first_json_object("no json here").is_none());
    }
}
