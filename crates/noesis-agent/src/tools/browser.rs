use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant, SystemTime};

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, Tab};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use noesis_core::event::ImageDescriptor;
use noesis_core::tool::{Tool, ToolContext, ToolResult};

const MAX_CONTENT_CHARS: usize = 32_000;
const MAX_BROWSER_AGE: Duration = Duration::from_secs(30 * 60);
const MAX_PAGE_IDLE: Duration = Duration::from_secs(5 * 60);
const SCREENSHOT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
const SCREENSHOT_MAX_FILES: usize = 100;
const JANITOR_INTERVAL: Duration = Duration::from_secs(10 * 60);

struct Session {
    _browser: Browser,
    tab: Arc<Tab>,
    created_at: Instant,
    last_used: Instant,
}

/// Headless-browser controller exposing {navigate, screenshot, click, type, evaluate,
/// content} (§4.1). A singleton `headless_chrome::Browser` is lazily started and a
/// single current tab is reused across calls until it goes idle or the browser
/// exceeds its max age, at which point it is recycled. Grounded on the teacher's
/// `BrowserTool` for the action surface and screenshot-to-workspace pattern; rebuilt
/// against `headless_chrome` (the only CDP automation crate anywhere in the pack,
/// carried over from `stencila-stencila`) since the teacher only shells out to a
/// Chromium binary per call and cannot support click/type/persistent-page actions.
pub struct BrowserTool {
    session: Mutex<Option<Session>>,
    janitored_dirs: StdMutex<HashSet<PathBuf>>,
}

impl BrowserTool {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
            janitored_dirs: StdMutex::new(HashSet::new()),
        }
    }

    fn spawn_janitor_once(&self, dir: PathBuf) {
        let mut seen = self.janitored_dirs.lock().unwrap();
        if seen.contains(&dir) {
            return;
        }
        seen.insert(dir.clone());
        drop(seen);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(JANITOR_INTERVAL);
            loop {
                interval.tick().await;
                if let Err(e) = clean_screenshot_dir(&dir) {
                    warn!(?dir, error = %e, "screenshot janitor pass failed");
                }
            }
        });
    }
}

impl Default for BrowserTool {
    fn default() -> Self {
        Self::new()
    }
}

fn clean_screenshot_dir(dir: &Path) -> std::io::Result<()> {
    let mut entries: Vec<(PathBuf, SystemTime)> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let meta = e.metadata().ok()?;
            let modified = meta.modified().ok()?;
            Some((e.path(), modified))
        })
        .collect();

    let now = SystemTime::now();
    entries.retain(|(path, modified)| {
        let age = now.duration_since(*modified).unwrap_or(Duration::ZERO);
        if age > SCREENSHOT_MAX_AGE {
            let _ = std::fs::remove_file(path);
            false
        } else {
            true
        }
    });

    if entries.len() > SCREENSHOT_MAX_FILES {
        entries.sort_by_key(|(_, modified)| *modified);
        let excess = entries.len() - SCREENSHOT_MAX_FILES;
        for (path, _) in entries.into_iter().take(excess) {
            let _ = std::fs::remove_file(path);
        }
    }

    Ok(())
}

#[async_trait]
impl Tool for BrowserTool {
    fn name(&self) -> &str {
        "browser"
    }

    fn description(&self) -> &str {
        "Headless browser for web interaction. Actions: navigate, screenshot, click, type, evaluate, content."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["navigate", "screenshot", "click", "type", "evaluate", "content"],
                    "description": "Action to perform"
                },
                "url": {
                    "type": "string",
                    "description": "URL to navigate to (required for navigate)"
                },
                "selector": {
                    "type": "string",
                    "description": "CSS selector (required for click/type)"
                },
                "text": {
                    "type": "string",
                    "description": "Text to type (required for type)"
                },
                "javascript": {
                    "type": "string",
                    "description": "JavaScript expression to evaluate (required for evaluate)"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let action = args
            .get("action")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("browser: missing 'action' argument"))?;

        let mut guard = self.session.lock().await;
        recycle_if_stale(&mut guard);

        if guard.is_none() {
            let browser = Browser::default()
                .map_err(|e| anyhow::anyhow!("failed to start headless browser: {e}"))?;
            let tab = browser
                .new_tab()
                .map_err(|e| anyhow::anyhow!("failed to open tab: {e}"))?;
            let now = Instant::now();
            *guard = Some(Session {
                _browser: browser,
                tab,
                created_at: now,
                last_used: now,
            });
        }

        let session = guard.as_mut().expect("just populated");
        session.last_used = Instant::now();
        let tab = session.tab.clone();

        let result = match action {
            "navigate" => {
                let url = require_url(&args)?;
                do_navigate(&tab, &url).await
            }
            "screenshot" => {
                let url = require_url(&args)?;
                do_screenshot(&tab, &url, ctx, self).await
            }
            "click" => {
                let selector = require_str(&args, "selector")?;
                do_click(&tab, &selector).await
            }
            "type" => {
                let selector = require_str(&args, "selector")?;
                let text = require_str(&args, "text")?;
                do_type(&tab, &selector, &text).await
            }
            "evaluate" => {
                let js = require_str(&args, "javascript")?;
                do_evaluate(&tab, &js).await
            }
            "content" => do_content(&tab).await,
            other => Ok(ToolResult::error(format!(
                "unknown action '{other}'. use navigate/screenshot/click/type/evaluate/content."
            ))),
        };

        result
    }
}

fn recycle_if_stale(guard: &mut Option<Session>) {
    if let Some(session) = guard.as_ref() {
        let too_old = session.created_at.elapsed() > MAX_BROWSER_AGE;
        let too_idle = session.last_used.elapsed() > MAX_PAGE_IDLE;
        if too_old || too_idle {
            *guard = None;
        }
    }
}

fn require_url(args: &Value) -> Result<String> {
    let url = args
        .get("url")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("browser: missing 'url' argument"))?;
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("browser: url must start with http:// or https://");
    }
    Ok(url.to_string())
}

fn require_str(args: &Value, field: &str) -> Result<String> {
    args.get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("browser: missing '{field}' argument"))
}

async fn do_navigate(tab: &Arc<Tab>, url: &str) -> Result<ToolResult> {
    let tab = tab.clone();
    let url = url.to_string();
    tokio::task::spawn_blocking(move || {
        tab.navigate_to(&url)?;
        tab.wait_until_navigated()?;
        Ok::<_, anyhow::Error>(())
    })
    .await??;
    Ok(ToolResult::success(format!("navigated to {url}")))
}

async fn do_screenshot(
    tab: &Arc<Tab>,
    url: &str,
    ctx: &ToolContext,
    tool: &BrowserTool,
) -> Result<ToolResult> {
    let screenshot_dir = PathBuf::from(&ctx.workspace_dir).join("screenshots");
    tokio::fs::create_dir_all(&screenshot_dir).await?;
    tool.spawn_janitor_once(screenshot_dir.clone());

    let tab_clone = tab.clone();
    let url_owned = url.to_string();
    let jpeg_bytes = tokio::task::spawn_blocking(move || {
        tab_clone.navigate_to(&url_owned)?;
        tab_clone.wait_until_navigated()?;
        tab_clone.capture_screenshot(CaptureScreenshotFormatOption::Jpeg, None, None, true)
    })
    .await??;

    let file_name = format!("screenshot_{}.jpg", uuid::Uuid::new_v4());
    let path = screenshot_dir.join(&file_name);
    tokio::fs::write(&path, &jpeg_bytes).await?;

    let b64 = base64::engine::general_purpose::STANDARD.encode(&jpeg_bytes);
    let descriptor = ImageDescriptor {
        mime: "image/jpeg".to_string(),
        data: b64,
        id: file_name,
    };

    Ok(ToolResult::success(format!(
        "screenshot of {url} saved to {}",
        path.display()
    ))
    .with_image(descriptor))
}

async fn do_click(tab: &Arc<Tab>, selector: &str) -> Result<ToolResult> {
    let tab = tab.clone();
    let selector = selector.to_string();
    tokio::task::spawn_blocking(move || {
        let element = tab.find_element(&selector)?;
        element.click()?;
        Ok::<_, anyhow::Error>(())
    })
    .await??;
    Ok(ToolResult::success(format!("clicked '{selector}'")))
}

async fn do_type(tab: &Arc<Tab>, selector: &str, text: &str) -> Result<ToolResult> {
    let tab = tab.clone();
    let selector = selector.to_string();
    let text = text.to_string();
    tokio::task::spawn_blocking(move || {
        let element = tab.find_element(&selector)?;
        element.click()?;
        element.type_into(&text)?;
        Ok::<_, anyhow::Error>(())
    })
    .await??;
    Ok(ToolResult::success(format!("typed into '{selector}'")))
}

async fn do_evaluate(tab: &Arc<Tab>, javascript: &str) -> Result<ToolResult> {
    let tab = tab.clone();
    let javascript = javascript.to_string();
    let value = tokio::task::spawn_blocking(move || {
        let remote = tab.evaluate(&javascript, true)?;
        Ok::<_, anyhow::Error>(remote.value.map(|v| v.to_string()).unwrap_or_default())
    })
    .await??;
    Ok(ToolResult::success(value))
}

async fn do_content(tab: &Arc<Tab>) -> Result<ToolResult> {
    let tab = tab.clone();
    let content = tokio::task::spawn_blocking(move || tab.get_content()).await??;
    let truncated = if content.len() > MAX_CONTENT_CHARS {
        format!(
            "{}\n\n... [{} chars truncated]",
            &content[..MAX_CONTENT_CHARS],
            content.len() - MAX_CONTENT_CHARS
        )
    } else {
        content
    };
    Ok(ToolResult::success(truncated))
}
