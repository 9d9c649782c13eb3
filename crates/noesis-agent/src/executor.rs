use std::sync::Arc;
use std::time::Duration;

use noesis_core::tool::{ToolContext, ToolRegistry, ToolResult};

const MAX_RETRIES: u32 = 2;
const RETRY_BACKOFF_MS: [u64; 2] = [2000, 4000];
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Action-name synonyms, keyed by the tool they apply to (§4.2 step 1). `*` applies
/// regardless of which tool is being called.
const ACTION_SYNONYMS: &[(&str, &str, &str)] = &[
    ("file", "save", "write"),
    ("browser", "visit", "navigate"),
    ("browser", "open", "navigate"),
    ("browser", "go", "navigate"),
];

/// Parameter-name synonyms applied to every tool call (§4.2 step 1).
const PARAM_SYNONYMS: &[(&str, &str)] = &[
    ("file_path", "path"),
    ("filename", "path"),
    ("cmd", "command"),
    ("website", "url"),
];

/// One normalization applied to a call, kept for the executor's log (§4.2 "normalizations are logged").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalization {
    pub from: String,
    pub to: String,
}

/// Apply the synonym table to a tool call's arguments. Returns the normalized args
/// plus a log of every rename actually applied.
pub fn normalize_args(
    tool_name: &str,
    mut args: serde_json::Value,
) -> (serde_json::Value, Vec<Normalization>) {
    let mut log = Vec::new();

    let Some(obj) = args.as_object_mut() else {
        return (args, log);
    };

    if let Some(action) = obj.get("action").and_then(|v| v.as_str()).map(String::from) {
        if let Some((_, _, canonical)) = ACTION_SYNONYMS
            .iter()
            .find(|(tool, synonym, _)| *tool == tool_name && *synonym == action)
        {
            log.push(Normalization {
                from: format!("action={action}"),
                to: format!("action={canonical}"),
            });
            obj.insert("action".to_string(), serde_json::Value::String(canonical.to_string()));
        }
    }

    // search -> navigate with a derived URL, specific to the browser tool.
    if tool_name == "browser" {
        if let Some(action) = obj.get("action").and_then(|v| v.as_str()) {
            if action == "search" {
                if let Some(query) = obj.remove("query").and_then(|v| v.as_str().map(String::from)) {
                    let url = format!("https://duckduckgo.com/?q={}", urlencode(&query));
                    obj.insert("action".to_string(), serde_json::Value::String("navigate".to_string()));
                    obj.insert("url".to_string(), serde_json::Value::String(url));
                    log.push(Normalization {
                        from: "action=search".to_string(),
                        to: "action=navigate (url derived from query)".to_string(),
                    });
                }
            }
        }
    }

    for (synonym, canonical) in PARAM_SYNONYMS {
        if obj.contains_key(*canonical) {
            continue;
        }
        if let Some(value) = obj.remove(*synonym) {
            obj.insert(canonical.to_string(), value);
            log.push(Normalization {
                from: synonym.to_string(),
                to: canonical.to_string(),
            });
        }
    }

    // urls[] -> url: take the first element of an array parameter.
    if !obj.contains_key("url") {
        if let Some(serde_json::Value::Array(urls)) = obj.remove("urls") {
            if let Some(first) = urls.into_iter().next() {
                obj.insert("url".to_string(), first);
                log.push(Normalization {
                    from: "urls[]".to_string(),
                    to: "url".to_string(),
                });
            }
        }
    }

    (args, log)
}

fn urlencode(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~') {
                c.to_string()
            } else {
                format!("%{:02X}", c as u32)
            }
        })
        .collect()
}

/// Outcome of one executor run, carrying the normalization log and heartbeat count
/// alongside the tool's own result.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub result: ToolResult,
    pub normalizations: Vec<Normalization>,
    pub retries: u32,
}

/// Dispatches a tool call with argument normalization, retry-on-exception, output
/// truncation, and a periodic heartbeat while the call is in flight (§4.2). Adapted
/// from the teacher's `runtime.rs` tool-invocation wrapper, but rebuilt against the
/// spec's literal truncation-marker format (`… [truncated N chars]`) rather than the
/// teacher's head/tail-split format.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    max_output_chars: usize,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, max_output_chars: usize) -> Self {
        Self {
            registry,
            max_output_chars,
        }
    }

    /// Execute `name(args)`, normalizing first, retrying thrown exceptions (not
    /// failure `ToolResult`s) up to `MAX_RETRIES` times with `2s,4s` backoff, and
    /// emitting a heartbeat callback every 5s while the call is outstanding.
    pub async fn execute<F>(
        &self,
        name: &str,
        args: serde_json::Value,
        ctx: &ToolContext,
        mut on_heartbeat: F,
    ) -> ExecutionOutcome
    where
        F: FnMut(),
    {
        let (args, normalizations) = normalize_args(name, args);

        let Some(tool) = self.registry.lookup(name) else {
            return ExecutionOutcome {
                result: ToolResult::error(format!("tool not found: {name}")),
                normalizations,
                retries: 0,
            };
        };

        let mut retries = 0;
        loop {
            let call = tool.execute(args.clone(), ctx);
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
            heartbeat.tick().await; // first tick fires immediately; discard it.

            tokio::pin!(call);
            let outcome = loop {
                tokio::select! {
                    biased;
                    result = &mut call => break result,
                    _ = heartbeat.tick() => on_heartbeat(),
                }
            };

            match outcome {
                Ok(result) => {
                    let result = truncate_output(result, self.max_output_chars);
                    return ExecutionOutcome {
                        result,
                        normalizations,
                        retries,
                    };
                }
                Err(e) if retries < MAX_RETRIES => {
                    let delay = RETRY_BACKOFF_MS[retries as usize];
                    tracing::warn!(tool = name, error = %e, retries, "tool call raised, retrying");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    retries += 1;
                }
                Err(e) => {
                    return ExecutionOutcome {
                        result: ToolResult::error(format!("{e}")),
                        normalizations,
                        retries,
                    };
                }
            }
        }
    }
}

/// Truncate overlong output, appending `… [truncated N chars]` where `N` is the count
/// of characters removed (§4.2 step 3).
fn truncate_output(mut result: ToolResult, max_chars: usize) -> ToolResult {
    if !result.images.is_empty() {
        return result;
    }

    let char_count = result.output.chars().count();
    if char_count <= max_chars {
        return result;
    }
    let truncated_chars = char_count - max_chars;
    let kept: String = result.output.chars().take(max_chars).collect();
    result.output = format!("{kept}… [truncated {truncated_chars} chars]");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_synonym_save_to_write() {
        let (args, log) = normalize_args("file", serde_json::json!({"action": "save"}));
        assert_eq!(args["action"], "write");
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_browser_synonyms() {
        let (args, _) = normalize_args("browser", serde_json::json!({"action": "visit"}));
        assert_eq!(args["action"], "navigate");
        let (args, _) = normalize_args("browser", serde_json::json!({"action": "open"}));
        assert_eq!(args["action"], "navigate");
    }

    #[test]
    fn test_search_derives_url() {
        let (args, log) = normalize_args(
            "browser",
            serde_json::json!({"action": "search", "query": "rust async"}),
        );
        assert_eq!(args["action"], "navigate");
        assert!(args["url"].as_str().unwrap().contains("rust"));
        assert!(log.iter().any(|n| n.from == "action=search"));
    }

    #[test]
    fn test_param_synonyms() {
        let (args, log) = normalize_args("file", serde_json::json!({"file_path": "a.txt"}));
        assert_eq!(args["path"], "a.txt");
        assert!(!args.as_object().unwrap().contains_key("file_path"));
        assert_eq!(log.len(), 1);

        let (args, _) = normalize_args("shell", serde_json::json!({"cmd": "ls"}));
        assert_eq!(args["command"], "ls");

        let (args, _) = normalize_args("web", serde_json::json!({"website": "example.com"}));
        assert_eq!(args["url"], "example.com");
    }

    #[test]
    fn test_urls_array_takes_first() {
        let (args, log) = normalize_args(
            "web",
            serde_json::json!({"urls": ["https://a.example", "https://b.example"]}),
        );
        assert_eq!(args["url"], "https://a.example");
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_existing_canonical_param_not_overwritten() {
        let (args, log) = normalize_args(
            "file",
            serde_json::json!({"path": "keep.txt", "file_path": "ignored.txt"}),
        );
        assert_eq!(args["path"], "keep.txt");
        assert!(log.is_empty());
    }

    #[test]
    fn test_truncate_output_adds_marker() {
        let result = ToolResult::success("a".repeat(100));
        let truncated = truncate_output(result, 10);
        assert!(truncated.output.starts_with(&"a".repeat(10)));
        assert!(truncated.output.contains("… [truncated 90 chars]"));
    }

    #[test]
    fn test_truncate_output_noop_when_short() {
        let result = ToolResult::success("short");
        let truncated = truncate_output(result, 100);
        assert_eq!(truncated.output, "short");
    }

    #[test]
    fn test_truncate_output_passes_through_when_images_present() {
        let result = ToolResult::success("a".repeat(100)).with_image(noesis_core::event::ImageDescriptor {
            mime: "image/jpeg".into(),
            data: "base64".into(),
            id: "shot.jpg".into(),
        });
        let untouched = truncate_output(result, 10);
        assert_eq!(untouched.output, "a".repeat(100));
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let registry = Arc::new(ToolRegistry::new());
        let executor = ToolExecutor::new(registry, 1000);
        let ctx = ToolContext::default();
        let outcome = executor
            .execute("missing", serde_json::json!({}), &ctx, || {})
            .await;
        assert!(outcome.result.is_error);
        assert_eq!(outcome.retries, 0);
    }
}
