//! View tool: read a text file with line numbers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use taskloom_core::error::ToolError;
use taskloom_core::tool::{Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};

use crate::paths;

pub const VIEW_TOOL_NAME: &str = "view";

const MAX_READ_SIZE: u64 = 250 * 1024;
const DEFAULT_READ_LIMIT: usize = 2000;
const MAX_LINE_LENGTH: usize = 2000;
const MAX_SUGGESTIONS: usize = 3;

const DESCRIPTION: &str = "File viewing tool that reads and displays the contents of files \
with line numbers.

HOW TO USE:
- Provide the path to the file you want to view
- Optionally specify an offset (0-based line) to start reading from
- Optionally specify a limit to control how many lines are read (default 2000)
- Do not use this for directories, use the ls tool instead

LIMITATIONS:
- Maximum file size is 250KB
- Lines longer than 2000 characters are truncated
- Cannot display binary files or images";

#[derive(Debug, Deserialize)]
struct ViewParams {
    #[serde(default)]
    file_path: String,
    #[serde(default)]
    offset: usize,
    #[serde(default)]
    limit: usize,
}

#[derive(Debug, Serialize)]
struct ViewMetadata {
    file_path: String,
    lines_read: usize,
    total_lines: usize,
}

pub struct ViewTool {
    working_dir: PathBuf,
}

impl ViewTool {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }
}

fn image_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("JPEG"),
        "png" => Some("PNG"),
        "gif" => Some("GIF"),
        "bmp" => Some("BMP"),
        "svg" => Some("SVG"),
        "webp" => Some("WebP"),
        _ => None,
    }
}

/// Up to three siblings whose names overlap the missing file's name.
async fn suggestions(path: &Path) -> Vec<String> {
    let (Some(dir), Some(base)) = (path.parent(), path.file_name()) else {
        return Vec::new();
    };
    let base = base.to_string_lossy().to_lowercase();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return Vec::new();
    };

    let mut found = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if name.contains(&base) || base.contains(&name) {
            found.push(dir.join(entry.file_name()).display().to_string());
            if found.len() >= MAX_SUGGESTIONS {
                break;
            }
        }
    }
    found
}

fn add_line_numbers(lines: &[String], start_line: usize) -> String {
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{:>6}→{}", i + start_line, line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Tool for ViewTool {
    fn name(&self) -> &str {
        VIEW_TOOL_NAME
    }

    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: VIEW_TOOL_NAME.into(),
            description: DESCRIPTION.into(),
            parameters: serde_json::json!({
                "file_path": {
                    "type": "string",
                    "description": "The path to the file to read"
                },
                "offset": {
                    "type": "integer",
                    "description": "Number of lines to skip from the beginning (0-based, default 0)"
                },
                "limit": {
                    "type": "integer",
                    "description": "The number of lines to read (defaults to 2000)"
                }
            }),
            required: vec!["file_path".into()],
        }
    }

    async fn run(&self, _ctx: &ToolContext, call: ToolCall) -> Result<ToolResponse, ToolError> {
        let params: ViewParams = call.parse_input()?;
        if params.file_path.is_empty() {
            return Ok(ToolResponse::error("file_path is required"));
        }

        let path = paths::resolve(&self.working_dir, &params.file_path);
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let similar = suggestions(&path).await;
                let message = if similar.is_empty() {
                    format!("File not found: {} (no such file or directory)", path.display())
                } else {
                    format!(
                        "File not found: {}\n\nDid you mean one of these?\n{}",
                        path.display(),
                        similar.join("\n")
                    )
                };
                return Ok(ToolResponse::error(message));
            }
            Err(e) => {
                return Err(ToolError::ExecutionFailed {
                    tool_name: VIEW_TOOL_NAME.into(),
                    reason: format!("error accessing file: {e}"),
                });
            }
        };

        if meta.is_dir() {
            return Ok(ToolResponse::error(format!(
                "Path is a directory, not a file: {}",
                path.display()
            )));
        }
        if meta.len() > MAX_READ_SIZE {
            return Ok(ToolResponse::error(format!(
                "File is too large ({} bytes). Maximum size is {MAX_READ_SIZE} bytes",
                meta.len()
            )));
        }
        if let Some(kind) = image_type(&path) {
            return Ok(ToolResponse::error(format!("This is an image file of type: {kind}")));
        }

        let bytes = tokio::fs::read(&path).await.map_err(|e| ToolError::ExecutionFailed {
            tool_name: VIEW_TOOL_NAME.into(),
            reason: format!("error reading file: {e}"),
        })?;
        let Ok(content) = String::from_utf8(bytes) else {
            return Ok(ToolResponse::error("File content is not valid UTF-8"));
        };

        let limit = if params.limit == 0 {
            DEFAULT_READ_LIMIT
        } else {
            params.limit
        };
        let total_lines = content.lines().count();
        let lines: Vec<String> = content
            .lines()
            .skip(params.offset)
            .take(limit)
            .map(|line| match paths::truncate_chars(line, MAX_LINE_LENGTH) {
                Some(head) => format!("{head}... (truncated)"),
                None => line.to_string(),
            })
            .collect();

        let mut output = String::from("<file>\n");
        if content.is_empty() {
            output.push_str("(empty file)");
        } else {
            output.push_str(&add_line_numbers(&lines, params.offset + 1));
        }

        let read_until = params.offset + lines.len();
        if lines.len() == limit && total_lines > read_until {
            output.push_str(&format!(
                "\n\n(File has {} more lines. Use 'offset' parameter to read from line {})",
                total_lines - read_until,
                read_until + 1
            ));
        }
        output.push_str("\n</file>");

        Ok(ToolResponse::text(output).with_metadata(&ViewMetadata {
            file_path: path.display().to_string(),
            lines_read: lines.len(),
            total_lines,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> ToolContext {
        ToolContext {
            session_id: "s".into(),
            message_id: "m".into(),
            cancel: CancellationToken::new(),
        }
    }

    fn call(input: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: VIEW_TOOL_NAME.into(),
            input: input.to_string(),
        }
    }

    #[tokio::test]
    async fn reads_with_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha\nbeta\n").unwrap();
        let tool = ViewTool::new(dir.path());

        let resp = tool
            .run(&ctx(), call(serde_json::json!({"file_path": "a.txt"})))
            .await
            .unwrap();
        assert!(!resp.is_error);
        assert_eq!(resp.content, "<file>\n     1→alpha\n     2→beta\n</file>");
    }

    #[tokio::test]
    async fn offset_and_limit_report_remaining_lines() {
        let dir = tempfile::tempdir().unwrap();
        let body: String = (1..=10).map(|i| format!("line {i}\n")).collect();
        std::fs::write(dir.path().join("big.txt"), body).unwrap();
        let tool = ViewTool::new(dir.path());

        let resp = tool
            .run(
                &ctx(),
                call(serde_json::json!({"file_path": "big.txt", "offset": 2, "limit": 3})),
            )
            .await
            .unwrap();
        assert!(resp.content.contains("     3→line 3"));
        assert!(resp.content.contains("     5→line 5"));
        assert!(!resp.content.contains("     6→line 6"));
        assert!(resp.content.contains("(File has 5 more lines. Use 'offset' parameter to read from line 6)"));
    }

    #[tokio::test]
    async fn missing_file_suggests_similar() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "x").unwrap();
        let tool = ViewTool::new(dir.path());

        let resp = tool
            .run(&ctx(), call(serde_json::json!({"file_path": "config"})))
            .await
            .unwrap();
        assert!(resp.is_error);
        assert!(resp.content.contains("Did you mean one of these?"));
        assert!(resp.content.contains("config.toml"));
    }

    #[tokio::test]
    async fn missing_file_without_suggestions() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ViewTool::new(dir.path());
        let resp = tool
            .run(&ctx(), call(serde_json::json!({"file_path": "nothing.rs"})))
            .await
            .unwrap();
        assert!(resp.content.ends_with("(no such file or directory)"));
    }

    #[tokio::test]
    async fn directories_and_images_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("pic.png"), [0u8, 1, 2]).unwrap();
        let tool = ViewTool::new(dir.path());

        let resp = tool
            .run(&ctx(), call(serde_json::json!({"file_path": "sub"})))
            .await
            .unwrap();
        assert!(resp.content.starts_with("Path is a directory"));

        let resp = tool
            .run(&ctx(), call(serde_json::json!({"file_path": "pic.png"})))
            .await
            .unwrap();
        assert_eq!(resp.content, "This is an image file of type: PNG");
    }

    #[tokio::test]
    async fn empty_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("empty.txt"), "").unwrap();
        let tool = ViewTool::new(dir.path());
        let resp = tool
            .run(&ctx(), call(serde_json::json!({"file_path": "empty.txt"})))
            .await
            .unwrap();
        assert_eq!(resp.content, "<file>\n(empty file)\n</file>");
    }
}
