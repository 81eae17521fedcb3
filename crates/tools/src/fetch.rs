//! Fetch tool: HTTP GET a URL and return its body as text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use taskloom_core::error::ToolError;
use taskloom_core::tool::{Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};
use tracing::debug;

pub const FETCH_TOOL_NAME: &str = "fetch";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_TIMEOUT_SECS: u64 = 120;
const MAX_READ_SIZE: usize = 5 * 1024 * 1024;
const MAX_CONTENT_SIZE: usize = 250 * 1024;
const USER_AGENT: &str = concat!("taskloom/", env!("CARGO_PKG_VERSION"));

const DESCRIPTION: &str = "Fetches content from a URL and returns it in the specified format.

HOW TO USE:
- Provide the URL to fetch content from
- Specify the desired output format (text or raw)
- Optionally set a timeout in seconds (max 120)

LIMITATIONS:
- Responses larger than 5MB are cut off
- Only supports HTTP and HTTPS protocols";

#[derive(Debug, Deserialize)]
struct FetchParams {
    #[serde(default)]
    url: String,
    #[serde(default)]
    format: String,
    /// Seconds
    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Debug, Serialize)]
struct FetchMetadata {
    url: String,
    status: u16,
    content_type: String,
    bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Text,
    Raw,
}

impl Format {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "text" => Some(Self::Text),
            "raw" => Some(Self::Raw),
            _ => None,
        }
    }
}

pub struct FetchTool {
    client: reqwest::Client,
}

impl FetchTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn fetch(
        &self,
        url: &str,
        timeout: Option<u64>,
    ) -> Result<Result<(u16, String, Vec<u8>), String>, ToolError> {
        let mut request = self.client.get(url);
        if let Some(secs) = timeout.filter(|s| *s > 0) {
            request = request.timeout(Duration::from_secs(secs.min(MAX_TIMEOUT_SECS)));
        }

        let mut response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return Err(ToolError::ExecutionFailed {
                    tool_name: FETCH_TOOL_NAME.into(),
                    reason: format!("failed to fetch URL: {e}"),
                });
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Ok(Err(format!(
                "Request failed with status code: {}",
                status.as_u16()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| ToolError::ExecutionFailed {
            tool_name: FETCH_TOOL_NAME.into(),
            reason: format!("failed to read response body: {e}"),
        })? {
            let room = MAX_READ_SIZE - body.len();
            if chunk.len() >= room {
                body.extend_from_slice(&chunk[..room]);
                break;
            }
            body.extend_from_slice(&chunk);
        }

        Ok(Ok((status.as_u16(), content_type, body)))
    }
}

impl Default for FetchTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Trim trailing whitespace and collapse runs of blank lines to at most two.
fn normalize_text(body: &str) -> String {
    let mut out = Vec::new();
    let mut blanks = 0;
    for line in body.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blanks += 1;
            if blanks > 2 {
                continue;
            }
        } else {
            blanks = 0;
        }
        out.push(line);
    }
    out.join("\n").trim().to_string()
}

#[async_trait]
impl Tool for FetchTool {
    fn name(&self) -> &str {
        FETCH_TOOL_NAME
    }

    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: FETCH_TOOL_NAME.into(),
            description: DESCRIPTION.into(),
            parameters: serde_json::json!({
                "url": {
                    "type": "string",
                    "description": "The URL to fetch content from"
                },
                "format": {
                    "type": "string",
                    "description": "The format to return the content in (text or raw)",
                    "enum": ["text", "raw"]
                },
                "timeout": {
                    "type": "number",
                    "description": "Optional timeout in seconds (max 120)"
                }
            }),
            required: vec!["url".into(), "format".into()],
        }
    }

    async fn run(&self, ctx: &ToolContext, call: ToolCall) -> Result<ToolResponse, ToolError> {
        let params: FetchParams = call.parse_input()?;
        if params.url.is_empty() {
            return Ok(ToolResponse::error("URL parameter is required"));
        }
        if params.format.is_empty() {
            return Ok(ToolResponse::error("format parameter is required"));
        }
        let Some(format) = Format::parse(&params.format) else {
            return Ok(ToolResponse::error("format must be 'text' or 'raw'"));
        };
        if !params.url.starts_with("http://") && !params.url.starts_with("https://") {
            return Ok(ToolResponse::error(
                "URL must start with http:// or https://",
            ));
        }

        debug!(url = %params.url, "Fetching URL");
        let fetched = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(ToolError::Cancelled),
            fetched = self.fetch(&params.url, params.timeout) => fetched?,
        };
        let (status, content_type, body) = match fetched {
            Ok(parts) => parts,
            Err(message) => return Ok(ToolResponse::error(message)),
        };

        let Ok(text) = String::from_utf8(body) else {
            return Ok(ToolResponse::error("Response content is not valid UTF-8"));
        };
        let mut content = match format {
            Format::Text => normalize_text(&text),
            Format::Raw => text,
        };

        let bytes = content.len();
        if content.len() > MAX_CONTENT_SIZE {
            let mut cut = MAX_CONTENT_SIZE;
            while !content.is_char_boundary(cut) {
                cut -= 1;
            }
            content.truncate(cut);
            content.push_str(&format!("\n\n[Content truncated to {MAX_CONTENT_SIZE} bytes]"));
        }

        Ok(ToolResponse::text(content).with_metadata(&FetchMetadata {
            url: params.url,
            status,
            content_type,
            bytes,
        }))
    }
}
