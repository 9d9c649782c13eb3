use std::net::IpAddr;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use noesis_core::tool::{Tool, ToolContext, ToolResult};

const MAX_BODY_BYTES: usize = 128 * 1024;
const TIMEOUT_SECS: u64 = 20;

/// Request headers never forwarded upstream (§4.1 "certain request headers are
/// stripped") — these would otherwise leak local proxy/auth context to an arbitrary
/// remote host.
const STRIPPED_HEADERS: &[&str] = &["authorization", "cookie", "x-forwarded-for", "host"];

/// HTTP request tool with URL validation: scheme must be http/https, host must not
/// resolve to a private/loopback/link-local range, port must not be in the sandbox's
/// blocklist (§4.1). Grounded on the teacher's `WebFetchTool`, extended with the
/// SSRF-shaped checks the teacher lacks.
pub struct WebTool;

#[async_trait]
impl Tool for WebTool {
    fn name(&self) -> &str {
        "web"
    }

    fn description(&self) -> &str {
        "Fetch a URL over HTTP(S) and return its content as text. HTML pages are converted to readable text."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch"
                },
                "raw": {
                    "type": "boolean",
                    "description": "If true, return the raw response body without HTML-to-text conversion (default: false)"
                },
                "headers": {
                    "type": "object",
                    "description": "Extra request headers to send. Headers that could leak local proxy/auth context (authorization, cookie, x-forwarded-for, host) are stripped before the request is sent.",
                    "additionalProperties": { "type": "string" }
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let url = args
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("web: missing 'url' argument"))?;
        let raw = args.get("raw").and_then(|v| v.as_bool()).unwrap_or(false);
        let headers = args
            .get("headers")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        if !ctx.sandbox.network_allowed {
            return Ok(ToolResult::error("network access disabled by sandbox policy"));
        }

        if let Err(msg) = validate_url(url, ctx).await {
            return Ok(ToolResult::error(msg));
        }

        match fetch_url(url, raw, &headers).await {
            Ok(content) => Ok(ToolResult::success(content)),
            Err(e) => Ok(ToolResult::error(format!("fetch failed: {e}"))),
        }
    }
}

async fn validate_url(url: &str, ctx: &ToolContext) -> std::result::Result<(), String> {
    let parsed = url::Url::parse(url).map_err(|_| "url: could not parse URL".to_string())?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err("url must use http:// or https://".to_string());
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| "url: missing host".to_string())?;

    let port = parsed
        .port_or_known_default()
        .ok_or_else(|| "url: could not determine port".to_string())?;
    if ctx.sandbox.is_port_blocked(port) {
        return Err(format!("port {port} is blocked by sandbox policy"));
    }

    let lookup_host = format!("{host}:{port}");
    let addrs = tokio::net::lookup_host(&lookup_host)
        .await
        .map_err(|e| format!("url: DNS resolution failed: {e}"))?;

    let mut resolved_any = false;
    for addr in addrs {
        resolved_any = true;
        if is_blocked_ip(addr.ip()) {
            return Err(format!("url resolves to a disallowed address: {}", addr.ip()));
        }
    }
    if !resolved_any {
        return Err("url: host did not resolve to any address".to_string());
    }

    Ok(())
}

/// Private, loopback, link-local, and unspecified ranges are never reachable via this
/// tool (§4.1 "must not resolve to a private/loopback/link-local range").
fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

fn build_request_headers(caller_headers: &serde_json::Map<String, Value>) -> reqwest::header::HeaderMap {
    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in caller_headers {
        let Some(value) = value.as_str() else { continue };
        let Ok(header_name) = reqwest::header::HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        let Ok(header_value) = reqwest::header::HeaderValue::from_str(value) else {
            continue;
        };
        headers.insert(header_name, header_value);
    }
    for name in STRIPPED_HEADERS {
        headers.remove(*name);
    }
    headers
}

async fn fetch_url(url: &str, raw: bool, caller_headers: &serde_json::Map<String, Value>) -> Result<String> {
    let headers = build_request_headers(caller_headers);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::limited(5))
        .user_agent("noesis-agent/0.1")
        .build()?;

    let response = client.get(url).headers(headers).send().await?;
    let status = response.status();
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if !status.is_success() {
        anyhow::bail!(
            "HTTP {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        );
    }

    let bytes = response.bytes().await?;
    if bytes.len() > MAX_BODY_BYTES {
        let truncated = String::from_utf8_lossy(&bytes[..MAX_BODY_BYTES]);
        return Ok(format!(
            "{truncated}\n\n... (truncated at {}KB)",
            MAX_BODY_BYTES / 1024
        ));
    }

    let body = String::from_utf8_lossy(&bytes).to_string();
    if raw {
        return Ok(body);
    }

    if content_type.contains("text/html")
        || body.trim_start().starts_with("<!")
        || body.trim_start().starts_with("<html")
    {
        Ok(html_to_text(&body))
    } else {
        Ok(body)
    }
}

/// Strip tags, skip script/style bodies, collapse block boundaries to newlines,
/// decode the common entities. Adapted from the teacher's `web_fetch.rs::html_to_text`.
fn html_to_text(html: &str) -> String {
    let mut text = String::with_capacity(html.len() / 2);
    let mut in_tag = false;
    let mut in_script = false;
    let mut in_style = false;
    let mut tag_name = String::new();
    let mut last_was_space = false;

    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                tag_name.clear();
            }
            '>' => {
                in_tag = false;
                let tag_lower = tag_name.to_lowercase();
                let tag_base = tag_lower.split_whitespace().next().unwrap_or("");
                match tag_base {
                    "script" => in_script = true,
                    "/script" => in_script = false,
                    "style" => in_style = true,
                    "/style" => in_style = false,
                    "br" | "br/" => {
                        text.push('\n');
                        last_was_space = true;
                    }
                    "p" | "/p" | "div" | "/div" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6"
                    | "/h1" | "/h2" | "/h3" | "/h4" | "/h5" | "/h6" | "li" | "tr" | "/tr" => {
                        if !text.ends_with('\n') {
                            text.push('\n');
                        }
                        last_was_space = true;
                    }
                    _ => {}
                }
            }
            _ if in_tag => tag_name.push(ch),
            _ if in_script || in_style => {}
            _ => {
                if ch.is_whitespace() {
                    if !last_was_space {
                        text.push(' ');
                        last_was_space = true;
                    }
                } else {
                    text.push(ch);
                    last_was_space = false;
                }
            }
        }
    }

    let text = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");

    let mut result = String::new();
    let mut blank_count = 0;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            blank_count += 1;
            if blank_count <= 2 {
                result.push('\n');
            }
        } else {
            blank_count = 0;
            result.push_str(trimmed);
            result.push('\n');
        }
    }
    result.trim().to_string()
}
