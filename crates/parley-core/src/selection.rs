//! Heuristic tool selection.
//!
//! Keyword and regex matching over the user's message decides which tool
//! calls to make before the provider is asked. This is deliberately not a
//! planner: several tools may fire for one message, and none firing is the
//! common case.

use std::sync::OnceLock;

use parley_types::ToolCall;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Timezone used when the message names none.
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// Longest query forwarded to search and memory tools, in bytes.
const MAX_QUERY_BYTES: usize = 400;

/// Which servers serve each tool family, and the knobs of the heuristics.
///
/// Deserialized from the `[tools]` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionPolicy {
    pub time_server: String,
    pub fetch_server: String,
    pub memory_server: String,
    pub git_server: String,
    pub search_server: String,
    /// Repository handed to the git tools.
    pub repo_path: String,
    /// Most URLs fetched for one message.
    pub max_urls: usize,
    /// Run sequential thinking for messages asking for deliberate reasoning.
    pub thinking: bool,
    /// Most sequential-thinking steps per message.
    pub thinking_steps: u32,
    /// Largest tool result merged into the prompt, in bytes.
    pub max_result_bytes: usize,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            time_server: "time".into(),
            fetch_server: "fetch".into(),
            memory_server: "memory".into(),
            git_server: "git".into(),
            search_server: "brave-search".into(),
            repo_path: ".".into(),
            max_urls: 3,
            thinking: true,
            thinking_steps: 3,
            max_result_bytes: 4000,
        }
    }
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("valid regex"))
}

fn time_query() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r"(?i)\b(what\s+time|current\s+(time|date)|time\s+(is\s+it|now|in\s+\w)|what(?:'s|\s+is)\s+the\s+(time|date)|today'?s\s+date|what\s+day\s+is|local\s+time)\b",
    )
}

fn timezone() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r"\b(UTC|GMT|(?:Africa|America|Antarctica|Asia|Atlantic|Australia|Europe|Indian|Pacific|Etc)/[A-Za-z_]+(?:/[A-Za-z_]+)?)\b",
    )
}

fn url() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r#"https?://[^\s<>"'`]+"#)
}

fn memory_recall() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r"(?i)\b(do\s+you\s+remember|what\s+do\s+you\s+(know|remember)|recall|what\s+did\s+i\s+(tell|say))\b",
    )
}

fn memory_store() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r"(?i)\b(remember\s+(that|this|my|me)|don'?t\s+forget|note\s+that|keep\s+in\s+mind|save\s+this)\b",
    )
}

fn git_topic() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r"(?i)\b(git|repo|repository|commits?|branch(es)?|diff|uncommitted|working\s+tree)\b",
    )
}

fn git_log() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?i)\b(commits?|log|history|recent\s+changes)\b")
}

fn git_diff() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?i)\b(diff|uncommitted|unstaged|what\s+changed)\b")
}

fn git_branch() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?i)\bbranch(es)?\b")
}

fn web_search() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r"(?i)\b(search\s+(the\s+web\s+|online\s+)?for|look\s+up|google|latest\s+news|news\s+(about|on)|web\s+search)\b",
    )
}

fn thinking_request() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r"(?i)\b(step[\s-]by[\s-]step|think\s+(it\s+)?through|analy[sz]e|plan(\s+out)?|break\s+(it\s+)?down|reason\s+through)\b",
    )
}

/// Characters stripped from the end of a URL found in prose.
const URL_TRAILING: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}', '\'', '"'];

/// Up to `limit` URLs in `message`, in order of appearance, without
/// duplicates. A limit of zero finds none.
pub fn extract_urls(message: &str, limit: usize) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for found in url().find_iter(message) {
        if urls.len() >= limit {
            break;
        }
        let cleaned = found.as_str().trim_end_matches(URL_TRAILING);
        if cleaned.len() <= "https://".len() || urls.iter().any(|u| u == cleaned) {
            continue;
        }
        urls.push(cleaned.to_string());
    }
    urls
}

/// The timezone named in `message`, or [`DEFAULT_TIMEZONE`].
pub fn extract_timezone(message: &str) -> String {
    timezone()
        .find(message)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string())
}

fn query(message: &str) -> String {
    parley_types::util::clip(message.trim(), MAX_QUERY_BYTES)
}

impl SelectionPolicy {
    /// Candidate tool calls for `message`.
    pub fn select_tools(&self, message: &str) -> Vec<ToolCall> {
        let mut calls = Vec::new();

        if time_query().is_match(message) {
            calls.push(ToolCall::new(
                &self.time_server,
                "get_current_time",
                json!({"timezone": extract_timezone(message)}),
            ));
        }

        for url in extract_urls(message, self.max_urls) {
            calls.push(ToolCall::new(&self.fetch_server, "fetch", json!({"url": url})));
        }

        if memory_recall().is_match(message) {
            calls.push(ToolCall::new(
                &self.memory_server,
                "search_nodes",
                json!({"query": query(message)}),
            ));
        } else if memory_store().is_match(message) {
            calls.push(ToolCall::new(
                &self.memory_server,
                "create_entities",
                json!({"entities": [{
                    "name": "user_note",
                    "entityType": "note",
                    "observations": [message.trim()],
                }]}),
            ));
        }

        if git_topic().is_match(message) {
            calls.extend(self.git_calls(message));
        }

        if web_search().is_match(message) {
            calls.push(ToolCall::new(
                &self.search_server,
                "brave_web_search",
                json!({"query": query(message), "count": 5}),
            ));
        }

        calls
    }

    /// Whether `message` asks for step-by-step reasoning.
    pub fn wants_thinking(&self, message: &str) -> bool {
        self.thinking && self.thinking_steps > 0 && thinking_request().is_match(message)
    }

    fn git_calls(&self, message: &str) -> Vec<ToolCall> {
        let repo = json!(self.repo_path);
        let mut calls = Vec::new();
        if git_log().is_match(message) {
            calls.push(ToolCall::new(
                &self.git_server,
                "git_log",
                json!({"repo_path": repo, "max_count": 10}),
            ));
        }
        if git_diff().is_match(message) {
            calls.push(ToolCall::new(
                &self.git_server,
                "git_diff_unstaged",
                json!({"repo_path": repo}),
            ));
        }
        if git_branch().is_match(message) {
            calls.push(ToolCall::new(
                &self.git_server,
                "git_branch",
                json!({"repo_path": repo, "branch_type": "local"}),
            ));
        }
        if calls.is_empty() {
            calls.push(ToolCall::new(
                &self.git_server,
                "git_status",
                json!({"repo_path": repo}),
            ));
        }
        calls
    }
}
