//! Write tool: create or overwrite a file.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use taskloom_core::error::ToolError;
use taskloom_core::tool::{Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};
use tracing::debug;

use crate::paths;

pub const WRITE_TOOL_NAME: &str = "write";

const DESCRIPTION: &str = "File writing tool that creates or updates files in the filesystem.

HOW TO USE:
- Provide the path to the file you want to write
- Include the complete content to be written to the file
- Parent directories are created when missing

TIPS:
- Use the view tool first to examine existing files before modifying them
- Use the edit tool for targeted changes to large files";

#[derive(Debug, Deserialize)]
struct WriteParams {
    #[serde(default)]
    file_path: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct FileChangeMetadata {
    pub file_path: String,
    pub additions: usize,
    pub removals: usize,
}

/// Count added and removed lines between two versions, ignoring order.
pub(crate) fn line_changes(old: &str, new: &str) -> (usize, usize) {
    let mut counts: HashMap<&str, isize> = HashMap::new();
    for line in old.lines() {
        *counts.entry(line).or_default() -= 1;
    }
    for line in new.lines() {
        *counts.entry(line).or_default() += 1;
    }

    counts.values().fold((0, 0), |(add, rem), &delta| {
        if delta > 0 {
            (add + delta as usize, rem)
        } else {
            (add, rem + delta.unsigned_abs())
        }
    })
}

/// Refuse paths under a credential location.
pub(crate) fn check_writable(tool_name: &str, path: &std::path::Path) -> Result<(), ToolError> {
    match paths::forbidden_prefix(path) {
        Some(prefix) => Err(ToolError::PermissionDenied {
            tool_name: tool_name.into(),
            reason: format!("writing under {prefix} is not allowed"),
        }),
        None => Ok(()),
    }
}

pub struct WriteTool {
    working_dir: PathBuf,
}

impl WriteTool {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }
}

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        WRITE_TOOL_NAME
    }

    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: WRITE_TOOL_NAME.into(),
            description: DESCRIPTION.into(),
            parameters: serde_json::json!({
                "file_path": {
                    "type": "string",
                    "description": "The path to the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write to the file"
                }
            }),
            required: vec!["file_path".into(), "content".into()],
        }
    }

    async fn run(&self, _ctx: &ToolContext, call: ToolCall) -> Result<ToolResponse, ToolError> {
        let params: WriteParams = call.parse_input()?;
        if params.file_path.is_empty() {
            return Ok(ToolResponse::error("file_path is required"));
        }

        let path = paths::resolve(&self.working_dir, &params.file_path);
        check_writable(WRITE_TOOL_NAME, &path)?;

        let existing = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => {
                return Ok(ToolResponse::error(format!(
                    "path is a directory, not a file: {}",
                    path.display()
                )));
            }
            Ok(_) => tokio::fs::read_to_string(&path).await.unwrap_or_default(),
            Err(_) => String::new(),
        };

        if path.exists() && existing == params.content {
            return Ok(ToolResponse::error("File content unchanged. No write performed."));
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::ExecutionFailed {
                    tool_name: WRITE_TOOL_NAME.into(),
                    reason: format!("error creating directory: {e}"),
                })?;
        }

        tokio::fs::write(&path, &params.content)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: WRITE_TOOL_NAME.into(),
                reason: format!("error writing file: {e}"),
            })?;
        debug!(path = %path.display(), bytes = params.content.len(), "File written");

        let (additions, removals) = line_changes(&existing, &params.content);
        Ok(ToolResponse::text(format!(
            "<result>\nsuccessfully wrote {} bytes to {}\n</result>",
            params.content.len(),
            path.display()
        ))
        .with_metadata(&FileChangeMetadata {
            file_path: path.display().to_string(),
            additions,
            removals,
        }))
    }
}
