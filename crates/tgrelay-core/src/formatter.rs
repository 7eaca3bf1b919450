//! Renders agent events into chat messages.
//!
//! Two modes: summary mode only forwards the events in [`SUMMARY_EVENTS`];
//! verbose mode forwards everything, tool calls included.

use std::sync::LazyLock;

use chrono::Local;
use regex::Regex;
use serde_json::Value;

pub const SUMMARY_EVENTS: &[&str] = &[
    "stop",
    "done",
    "error",
    "question",
    "plan_ready",
    "review",
    "limit",
    "end",
    "feature_complete",
    "tests_passed",
    "tests_failed",
];

const DEFAULT_PROJECT: &str = "Claude Code";
const INTERNAL_FIELDS: &[&str] = &["parentUuid", "sessionId", "isSidechain", "userType", "version"];

static CATEGORY_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\{"category":\s*"[^"]+",?\s*"summary":\s*""#).expect("valid regex"));
static TRAILING_QUOTE_BRACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""\s*\}$"#).expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static UUID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}").expect("valid regex")
});
static TESTS_PASSED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*(tests?\s*)?pass(ed)?").expect("valid regex"));
static TESTS_FAILED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*(tests?\s*)?fail(ed)?").expect("valid regex"));

pub fn tool_emoji(tool: &str) -> &'static str {
    match tool {
        "Bash" => "🔨",
        "Edit" => "📝",
        "Write" => "✍️",
        "Read" => "📖",
        "Glob" | "WebSearch" => "🔍",
        "Grep" => "🔎",
        "Task" => "🤖",
        "TaskOutput" => "📤",
        "WebFetch" => "🌐",
        "TodoWrite" => "📋",
        "AskUserQuestion" => "❓",
        "NotebookEdit" => "📓",
        _ => "⚙️",
    }
}

pub fn event_emoji(event: &str) -> &'static str {
    match event {
        "success" | "stop" | "tests_passed" => "✅",
        "error" | "tests_failed" => "❌",
        "warning" => "⚠️",
        "info" => "ℹ️",
        "working" => "🔄",
        "done" => "🎉",
        "question" => "❓",
        "end" => "🏁",
        "plan_ready" => "📋",
        "review" => "🔍",
        "limit" => "⏱️",
        "feature_complete" => "🎯",
        _ => "🤖",
    }
}

/// Emoji for the plain `{message, status}` notification shape.
fn legacy_status_emoji(status: &str) -> &'static str {
    match status {
        "stop" => "⏸️",
        "success" | "error" | "warning" | "info" | "working" | "done" | "question" | "end" => {
            event_emoji(status)
        }
        _ => "🤖",
    }
}

fn event_label(event: &str) -> &'static str {
    match event {
        "stop" | "done" => "Task Complete",
        "end" => "Session Ended",
        "error" => "Error",
        "question" => "Question",
        "plan_ready" => "Plan Ready",
        "review" => "Review Complete",
        "limit" => "Context Limit",
        "feature_complete" => "Feature Complete",
        "tests_passed" => "Tests Passed",
        "tests_failed" => "Tests Failed",
        _ => "Update",
    }
}

pub fn is_summary_event(event: &str) -> bool {
    SUMMARY_EVENTS.contains(&event)
}

/// Plain notification: status emoji, bold project name, message and a timestamp.
pub fn format_notification(message: &str, status: Option<&str>, project: Option<&str>) -> String {
    let emoji = legacy_status_emoji(status.unwrap_or("info"));
    let project = project.filter(|p| !p.is_empty()).unwrap_or(DEFAULT_PROJECT);
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    format!("{emoji} *{project}*\n\n{message}\n\n_{timestamp}_")
}

/// Render an event, or `None` when the current mode skips it.
///
/// `data` is the flattened event payload: `project`, `toolName`, `input`,
/// `result` plus event specific fields (`summary`, `error`, `question`,
/// `featureId`, `count`).
pub fn format_event(event_type: &str, data: &Value, verbose: bool) -> Option<String> {
    let tool_name = text_field(data, "toolName");

    if event_type == "tool" {
        if !verbose {
            return None;
        }
        return tool_name.map(|tool| format_tool_event(&tool, data.get("input"), data.get("result")));
    }

    if verbose {
        if let Some(tool) = tool_name {
            return Some(format_tool_event(&tool, data.get("input"), data.get("result")));
        }
        return Some(format_summary_event(event_type, data));
    }

    is_summary_event(event_type).then(|| format_summary_event(event_type, data))
}

pub fn format_tool_event(tool: &str, input: Option<&Value>, result: Option<&Value>) -> String {
    let mut lines = vec![format!("{} {tool}", tool_emoji(tool)), String::new()];
    let parsed = input.map(parse_input).unwrap_or(Value::Null);
    let result = result.and_then(value_text);

    match tool {
        "Bash" => {
            let command = str_field(&parsed, &["command", "cmd"]).or_else(|| match input {
                Some(Value::String(raw)) if !parsed.is_object() => Some(raw.clone()),
                _ => None,
            });
            if let Some(command) = command {
                lines.push(format!("Command: {}", truncate(&command, 100)));
            }
            if let Some(result) = &result {
                lines.push(format!("Result: {}", summarize_bash_result(result, 200)));
            }
        }
        "Edit" => {
            if let Some(path) = file_path(&parsed) {
                lines.push(format!("File: {path}"));
            }
            if let Some(old) = str_field(&parsed, &["old_string"]) {
                let new = str_field(&parsed, &["new_string"]).unwrap_or_default();
                lines.push(format!("Changed: {} → {}", truncate(&old, 50), truncate(&new, 50)));
            }
        }
        "Write" => {
            if let Some(path) = file_path(&parsed) {
                lines.push(format!("File: {path}"));
                lines.push("Action: Created/Overwritten".to_string());
            }
        }
        "Read" => {
            if let Some(path) = file_path(&parsed) {
                lines.push(format!("File: {path}"));
            }
            if let Some(result) = &result {
                lines.push(format!("Lines: {}", result.split('\n').count()));
            }
        }
        "Task" => {
            if parsed.is_object() {
                let agent = str_field(&parsed, &["subagent_type"]).unwrap_or_else(|| "unknown".into());
                lines.push(format!("Agent: {agent}"));
                if let Some(desc) = str_field(&parsed, &["description"]) {
                    lines.push(format!("Task: {desc}"));
                }
                if let Some(prompt) = str_field(&parsed, &["prompt"]) {
                    lines.push(format!("Prompt: {}", truncate(&prompt, 150)));
                }
            }
        }
        "TaskOutput" => {
            lines.push("Status: Retrieving agent output".to_string());
            if let Some(result) = &result {
                lines.push(format!("Result: {}", truncate(result, 200)));
            }
        }
        "Glob" => {
            if let Some(pattern) = str_field(&parsed, &["pattern"]) {
                lines.push(format!("Pattern: {pattern}"));
            }
            if let Some(path) = str_field(&parsed, &["path"]) {
                lines.push(format!("Path: {path}"));
            }
            if let Some(result) = &result {
                lines.push(format!("Found: {} files", count_nonblank_lines(result)));
            }
        }
        "Grep" => {
            if let Some(pattern) = str_field(&parsed, &["pattern"]) {
                lines.push(format!("Search: {pattern}"));
            }
            if let Some(result) = &result {
                lines.push(format!("Matches: {}", count_nonblank_lines(result)));
            }
        }
        "AskUserQuestion" => {
            lines[0] = "❓ Question".to_string();
            if let Some(first) = parsed.get("questions").and_then(|q| q.get(0)) {
                if let Some(question) = str_field(first, &["question"]) {
                    lines.push(question);
                }
                if let Some(options) = first.get("options").and_then(Value::as_array) {
                    let labels: Vec<&str> = options
                        .iter()
                        .filter_map(|o| o.get("label").and_then(Value::as_str))
                        .collect();
                    lines.push(format!("Options: {}", labels.join(", ")));
                }
            }
        }
        _ => {
            let raw = input.map(Value::to_string).unwrap_or_default();
            lines.push(format!("Input: {}", truncate(&raw, 100)));
            if let Some(result) = &result {
                lines.push(format!("Result: {}", truncate(result, 100)));
            }
        }
    }

    lines.push(String::new());
    lines.push(format!("⏰ {}", short_time()));
    lines.join("\n")
}

/// `<emoji> <project> | <label>`, an optional body and a timestamp footer.
pub fn format_summary_event(event_type: &str, data: &Value) -> String {
    let project = text_field(data, "project").unwrap_or_else(|| DEFAULT_PROJECT.to_string());
    let summary = text_field(data, "summary").and_then(|s| clean_summary_text(&s));

    let mut parts = vec![format!(
        "{} {project} | {}",
        event_emoji(event_type),
        event_label(event_type)
    )];
    let mut body = |text: String| {
        parts.push(String::new());
        parts.push(text);
    };

    match event_type {
        "feature_complete" => {
            if let Some(feature) = text_field(data, "featureId") {
                body(format!("Feature: {feature}"));
            }
            if let Some(summary) = summary {
                body(summary);
            }
        }
        "error" => {
            if let Some(error) = text_field(data, "error") {
                body(clean_summary_text(&error).unwrap_or_else(|| truncate(&error, 200)));
            }
        }
        "question" => {
            if let Some(question) = text_field(data, "question") {
                body(question);
            }
        }
        "plan_ready" => body("Claude has a plan ready for your approval".to_string()),
        "limit" => body("Session needs to be compacted or restarted".to_string()),
        "tests_passed" => {
            if let Some(count) = text_field(data, "count") {
                body(format!("{count} tests passed"));
            }
        }
        "tests_failed" => {
            if let Some(count) = text_field(data, "count") {
                body(format!("{count} tests failed"));
            }
            if let Some(summary) = summary {
                body(summary);
            }
        }
        _ => {
            if let Some(summary) = summary {
                body(summary);
            }
        }
    }

    parts.push(String::new());
    parts.push(format!("⏰ {}", short_time()));
    parts.join("\n")
}

/// Strip transcript metadata out of a summary. Returns `None` when nothing
/// readable is left.
pub fn clean_summary_text(text: &str) -> Option<String> {
    let mut cleaned = text.trim().to_string();
    if cleaned.is_empty() {
        return None;
    }
    if INTERNAL_FIELDS
        .iter()
        .any(|field| cleaned.contains(&format!("\"{field}\"")))
    {
        return None;
    }

    if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) {
        if start < end {
            if let Ok(parsed) = serde_json::from_str::<Value>(&cleaned[start..=end]) {
                if parsed.get("parentUuid").is_some_and(is_truthy)
                    || parsed.get("sessionId").is_some_and(is_truthy)
                    || parsed.get("isSidechain").is_some()
                {
                    return None;
                }
                cleaned = ["summary", "message", "details", "description", "result"]
                    .iter()
                    .find_map(|key| text_field(&parsed, key))?;
            }
        }
    }

    let cleaned = CATEGORY_PREFIX.replace_all(&cleaned, "");
    let cleaned = TRAILING_QUOTE_BRACE.replace_all(&cleaned, "");
    let cleaned = cleaned.replace("\\n", "\n").replace("\\\"", "\"");
    let cleaned = WHITESPACE.replace_all(&cleaned, " ").trim().to_string();

    if cleaned.is_empty() || cleaned.starts_with('{') || cleaned.starts_with('[') {
        return None;
    }
    if UUID.find_iter(&cleaned).count() > 1 {
        return None;
    }
    Some(cleaned)
}

/// Collapse shell output into a one-line verdict where a pattern is recognised.
fn summarize_bash_result(result: &str, max_len: usize) -> String {
    let trimmed = result.trim();
    if trimmed.is_empty() {
        return "completed".to_string();
    }

    if trimmed.contains("PASSED") || trimmed.contains("passed") {
        if let Some(caps) = TESTS_PASSED.captures(trimmed) {
            return format!("✅ {} tests passed", &caps[1]);
        }
    }
    if trimmed.contains("FAILED") || trimmed.contains("failed") {
        if let Some(caps) = TESTS_FAILED.captures(trimmed) {
            return format!("❌ {} tests failed", &caps[1]);
        }
    }
    if trimmed.contains("error") || trimmed.contains("Error") {
        return "❌ Error occurred".to_string();
    }
    if trimmed.contains("Successfully") || trimmed.contains("successfully") {
        return "✅ Success".to_string();
    }

    truncate(&trimmed.replace('\n', " "), max_len)
}

/// Trim, then cut to `max_len` characters with a trailing `...`.
pub fn truncate(text: &str, max_len: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_len.saturating_sub(3)).collect();
    format!("{kept}...")
}

fn short_time() -> String {
    Local::now().format("%H:%M").to_string()
}

/// Tool input arrives either as an object or as a JSON encoded string.
fn parse_input(input: &Value) -> Value {
    match input {
        Value::String(raw) => serde_json::from_str(raw).unwrap_or(Value::Null),
        other => other.clone(),
    }
}

fn file_path(input: &Value) -> Option<String> {
    str_field(input, &["file_path", "path", "file"])
}

fn str_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| text_field(value, key))
}

/// Field as display text; null, empty and falsy values count as absent.
fn text_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).filter(|v| is_truthy(v)).and_then(value_text)
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn count_nonblank_lines(text: &str) -> usize {
    text.split('\n').filter(|l| !l.trim().is_empty()).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_events_are_skipped_in_summary_mode() {
        let data = json!({"toolName": "Bash", "input": {"command": "ls"}});
        assert!(format_event("tool", &data, false).is_none());
        let text = format_event("tool", &data, true).unwrap();
        assert!(text.starts_with("🔨 Bash\n\nCommand: ls"));
    }

    #[test]
    fn summary_mode_filters_unimportant_events() {
        let data = json!({"project": "api"});
        assert!(format_event("notification", &data, false).is_none());
        let text = format_event("notification", &data, true).unwrap();
        assert!(text.starts_with("🤖 api | Update"));
        let text = format_event("stop", &json!({"project": "api", "summary": "All done"}), false).unwrap();
        assert!(text.starts_with("✅ api | Task Complete\n\nAll done\n\n⏰ "));
    }

    #[test]
    fn bash_results_are_summarized() {
        assert_eq!(summarize_bash_result("", 50), "completed");
        assert_eq!(summarize_bash_result("12 tests passed", 50), "✅ 12 tests passed");
        assert_eq!(summarize_bash_result("3 failed, 1 passed", 50), "✅ 1 tests passed");
        assert_eq!(summarize_bash_result("FAILED: 2 failed", 50), "❌ 2 tests failed");
        assert_eq!(summarize_bash_result("Error: nope", 50), "❌ Error occurred");
        assert_eq!(summarize_bash_result("line1\nline2", 50), "line1 line2");
    }

    #[test]
    fn tool_input_may_be_json_string() {
        let input = json!("{\"file_path\":\"/src/main.rs\",\"old_string\":\"a\",\"new_string\":\"b\"}");
        let text = format_tool_event("Edit", Some(&input), None);
        assert!(text.contains("File: /src/main.rs"));
        assert!(text.contains("Changed: a → b"));
    }

    #[test]
    fn ask_user_question_lists_options() {
        let input = json!({"questions": [{"question": "Which db?", "options": [{"label": "pg"}, {"label": "sqlite"}]}]});
        let text = format_tool_event("AskUserQuestion", Some(&input), None);
        assert!(text.starts_with("❓ Question\n\nWhich db?\nOptions: pg, sqlite"));
    }

    #[test]
    fn unknown_tool_uses_raw_input() {
        let text = format_tool_event("WebFetch", Some(&json!({"url": "x"})), Some(&json!("ok")));
        assert!(text.starts_with("🌐 WebFetch"));
        assert!(text.contains(r#"Input: {"url":"x"}"#));
        assert!(text.contains("Result: ok"));
    }

    #[test]
    fn clean_summary_drops_internal_metadata() {
        assert_eq!(clean_summary_text(r#"{"parentUuid":"x","text":"y"}"#), None);
        assert_eq!(
            clean_summary_text(r#"{"category":"done","summary":"Built the thing"}"#).as_deref(),
            Some("Built the thing")
        );
        assert_eq!(clean_summary_text(r#"{"other": 1}"#), None);
        assert_eq!(clean_summary_text("  many   spaces\n here "), Some("many spaces here".into()));
        assert_eq!(
            clean_summary_text(
                "ids 123e4567-e89b-12d3-a456-426614174000 and 123e4567-e89b-12d3-a456-426614174001"
            ),
            None
        );
        assert_eq!(clean_summary_text("   "), None);
    }

    #[test]
    fn summary_events_render_fixed_bodies() {
        let text = format_summary_event("plan_ready", &json!({}));
        assert!(text.starts_with("📋 Claude Code | Plan Ready\n\nClaude has a plan ready for your approval"));
        let text = format_summary_event("tests_failed", &json!({"count": 2}));
        assert!(text.contains("2 tests failed"));
        let text = format_summary_event("tests_passed", &json!({"count": 0}));
        assert!(!text.contains("tests passed\n"));
    }

    #[test]
    fn legacy_notification_layout() {
        let text = format_notification("Build finished", Some("stop"), Some("web"));
        assert!(text.starts_with("⏸️ *web*\n\nBuild finished\n\n_"));
        let text = format_notification("hi", None, None);
        assert!(text.starts_with("ℹ️ *Claude Code*"));
    }

    #[test]
    fn truncate_counts_chars() {
        assert_eq!(truncate("abcdef", 10), "abcdef");
        assert_eq!(truncate("abcdefghijk", 10), "abcdefg...");
        assert_eq!(truncate("ééééééééééé", 5), "éé...");
    }
}
