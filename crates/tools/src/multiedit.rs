//! Multi-edit tool: several replacements applied to one file at once.
//!
//! Edits run in order against the in-memory content, each on the result
//! of the previous one. The file is written only if every edit applies.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use taskloom_core::error::ToolError;
use taskloom_core::tool::{Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};
use tracing::debug;

use crate::edit::replace_in;
use crate::paths;
use crate::write::{check_writable, line_changes};

pub const MULTI_EDIT_TOOL_NAME: &str = "multiedit";

const DESCRIPTION: &str = "Makes several find-and-replace edits to a single file in one operation. Prefer it over the edit tool when changing several places in the same file.

HOW TO USE:
- file_path: path to the file to modify or create
- edits: list of edits, each with old_string, new_string and optional replace_all

IMPORTANT:
- Edits are applied in the order given, each to the result of the previous one
- Either every edit applies or the file is left untouched
- Each edit follows the edit tool's rules: exact match, unique unless replace_all is set
- Make sure earlier edits do not change text that later edits look for

To create a new file, give the first edit an empty old_string and the file contents as new_string. Later edits then operate on that content.";

#[derive(Debug, Deserialize)]
struct EditOperation {
    #[serde(default)]
    old_string: String,
    #[serde(default)]
    new_string: String,
    #[serde(default)]
    replace_all: bool,
}

#[derive(Debug, Deserialize)]
struct MultiEditParams {
    #[serde(default)]
    file_path: String,
    #[serde(default)]
    edits: Vec<EditOperation>,
}

#[derive(Debug, Serialize)]
struct MultiEditMetadata {
    file_path: String,
    edits_applied: usize,
    additions: usize,
    removals: usize,
}

pub struct MultiEditTool {
    working_dir: PathBuf,
}

impl MultiEditTool {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }
}

fn failed(reason: impl std::fmt::Display) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: MULTI_EDIT_TOOL_NAME.into(),
        reason: reason.to_string(),
    }
}

fn validate(edits: &[EditOperation]) -> Result<(), String> {
    if edits.is_empty() {
        return Err("at least one edit is required".into());
    }
    for (i, edit) in edits.iter().enumerate() {
        let n = i + 1;
        if edit.old_string.is_empty() && edit.new_string.is_empty() {
            return Err(format!(
                "edit {n}: both old_string and new_string cannot be empty"
            ));
        }
        if edit.old_string == edit.new_string {
            return Err(format!("edit {n}: old_string and new_string are identical"));
        }
        if i > 0 && edit.old_string.is_empty() {
            return Err(format!(
                "edit {n}: only the first edit can have an empty old_string (for file creation)"
            ));
        }
    }
    Ok(())
}

/// Apply `edits` in order, numbering failures from `first`.
fn apply_all(mut content: String, edits: &[EditOperation], first: usize) -> Result<String, String> {
    for (i, edit) in edits.iter().enumerate() {
        let (next, _) = replace_in(&content, &edit.old_string, &edit.new_string, edit.replace_all)
            .map_err(|reason| format!("edit {} failed: {reason}", i + first))?;
        content = next;
    }
    Ok(content)
}

fn response(message: String, path: &Path, edits: usize, old: &str, new: &str) -> ToolResponse {
    let (additions, removals) = line_changes(old, new);
    ToolResponse::text(message).with_metadata(&MultiEditMetadata {
        file_path: path.display().to_string(),
        edits_applied: edits,
        additions,
        removals,
    })
}

async fn create_with_edits(path: &Path, edits: &[EditOperation]) -> Result<ToolResponse, ToolError> {
    if tokio::fs::metadata(path).await.is_ok() {
        return Ok(ToolResponse::error(format!(
            "file already exists: {} (remove it first or use the edit tool)",
            path.display()
        )));
    }

    let content = match apply_all(edits[0].new_string.clone(), &edits[1..], 2) {
        Ok(content) => content,
        Err(reason) => return Ok(ToolResponse::error(reason)),
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| failed(format!("failed to create parent directories: {e}")))?;
    }
    tokio::fs::write(path, &content)
        .await
        .map_err(|e| failed(format!("failed to write file: {e}")))?;
    debug!(path = %path.display(), edits = edits.len(), "File created by multiedit");

    Ok(response(
        format!("File created with {} edits: {}", edits.len(), path.display()),
        path,
        edits.len(),
        "",
        &content,
    ))
}

async fn edit_existing(path: &Path, edits: &[EditOperation]) -> Result<ToolResponse, ToolError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => {
            return Ok(ToolResponse::error(format!(
                "path is a directory, not a file: {}",
                path.display()
            )));
        }
        Ok(_) => {}
        Err(_) => {
            return Ok(ToolResponse::error(format!(
                "file does not exist: {} (use a first edit with an empty old_string to create it)",
                path.display()
            )));
        }
    }

    let original = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| failed(format!("failed to read file: {e}")))?;
    // Edits match against LF text; CRLF files are written back as CRLF.
    let crlf = original.contains("\r\n");
    let old_content = original.replace("\r\n", "\n");

    let new_content = match apply_all(old_content.clone(), edits, 1) {
        Ok(content) => content,
        Err(reason) => return Ok(ToolResponse::error(reason)),
    };
    if new_content == old_content {
        return Ok(ToolResponse::error(
            "No changes made (all edits resulted in identical content)",
        ));
    }

    let written = if crlf {
        new_content.replace('\n', "\r\n")
    } else {
        new_content.clone()
    };
    tokio::fs::write(path, written)
        .await
        .map_err(|e| failed(format!("failed to write file: {e}")))?;
    debug!(path = %path.display(), edits = edits.len(), "File edited by multiedit");

    Ok(response(
        format!("Applied {} edits to file: {}", edits.len(), path.display()),
        path,
        edits.len(),
        &old_content,
        &new_content,
    ))
}

#[async_trait]
impl Tool for MultiEditTool {
    fn name(&self) -> &str {
        MULTI_EDIT_TOOL_NAME
    }

    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: MULTI_EDIT_TOOL_NAME.into(),
            description: DESCRIPTION.into(),
            parameters: serde_json::json!({
                "file_path": {
                    "type": "string",
                    "description": "The path to the file to modify"
                },
                "edits": {
                    "type": "array",
                    "minItems": 1,
                    "description": "Edit operations to perform in order on the file",
                    "items": {
                        "type": "object",
                        "properties": {
                            "old_string": {
                                "type": "string",
                                "description": "The text to replace"
                            },
                            "new_string": {
                                "type": "string",
                                "description": "The text to replace it with"
                            },
                            "replace_all": {
                                "type": "boolean",
                                "default": false,
                                "description": "Replace all occurrences of old_string (default false)"
                            }
                        },
                        "required": ["old_string", "new_string"],
                        "additionalProperties": false
                    }
                }
            }),
            required: vec!["file_path".into(), "edits".into()],
        }
    }

    async fn run(&self, _ctx: &ToolContext, call: ToolCall) -> Result<ToolResponse, ToolError> {
        let params: MultiEditParams = call.parse_input()?;
        if params.file_path.is_empty() {
            return Ok(ToolResponse::error("file_path is required"));
        }
        if let Err(reason) = validate(&params.edits) {
            return Ok(ToolResponse::error(reason));
        }

        let path = paths::resolve(&self.working_dir, &params.file_path);
        check_writable(MULTI_EDIT_TOOL_NAME, &path)?;

        if params.edits[0].old_string.is_empty() {
            create_with_edits(&path, &params.edits).await
        } else {
            edit_existing(&path, &params.edits).await
        }
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

    async fn multiedit(dir: &Path, input: serde_json::Value) -> ToolResponse {
        MultiEditTool::new(dir)
            .run(
                &ctx(),
                ToolCall {
                    id: "c1".into(),
                    name: MULTI_EDIT_TOOL_NAME.into(),
                    input: input.to_string(),
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn edits_apply_in_sequence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("main.rs"),
            "fn main() {\n    let count = 1;\n    println!(\"{count}\");\n}\n",
        )
        .unwrap();

        let resp = multiedit(
            dir.path(),
            serde_json::json!({
                "file_path": "main.rs",
                "edits": [
                    {"old_string": "count", "new_string": "total", "replace_all": true},
                    {"old_string": "let total = 1;", "new_string": "let total = 2;"}
                ]
            }),
        )
        .await;
        assert!(!resp.is_error, "{}", resp.content);
        assert!(resp.content.starts_with("Applied 2 edits to file: "));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("main.rs")).unwrap(),
            "fn main() {\n    let total = 2;\n    println!(\"{total}\");\n}\n"
        );

        let metadata: serde_json::Value =
            serde_json::from_str(resp.metadata.as_deref().unwrap()).unwrap();
        assert_eq!(metadata["edits_applied"], 2);
        assert_eq!(metadata["additions"], 2);
        assert_eq!(metadata["removals"], 2);
    }

    #[tokio::test]
    async fn failing_edit_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "alpha beta").unwrap();

        let resp = multiedit(
            dir.path(),
            serde_json::json!({
                "file_path": "f.txt",
                "edits": [
                    {"old_string": "alpha", "new_string": "gamma"},
                    {"old_string": "missing", "new_string": "x"}
                ]
            }),
        )
        .await;
        assert!(resp.is_error);
        assert!(resp.content.starts_with("edit 2 failed: old_string not found"));
        assert_eq!(std::fs::read_to_string(dir.path().join("f.txt")).unwrap(), "alpha beta");
    }

    #[tokio::test]
    async fn ambiguous_edit_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "x x").unwrap();

        let resp = multiedit(
            dir.path(),
            serde_json::json!({
                "file_path": "f.txt",
                "edits": [{"old_string": "x", "new_string": "y"}]
            }),
        )
        .await;
        assert!(resp.is_error);
        assert!(resp.content.starts_with("edit 1 failed: old_string appears 2 times"));
    }

    #[tokio::test]
    async fn first_empty_old_string_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let resp = multiedit(
            dir.path(),
            serde_json::json!({
                "file_path": "src/lib.rs",
                "edits": [
                    {"old_string": "", "new_string": "pub fn old() {}\n"},
                    {"old_string": "old", "new_string": "new"}
                ]
            }),
        )
        .await;
        assert!(!resp.is_error, "{}", resp.content);
        assert!(resp.content.starts_with("File created with 2 edits: "));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/lib.rs")).unwrap(),
            "pub fn new() {}\n"
        );

        // A second creation is refused
        let resp = multiedit(
            dir.path(),
            serde_json::json!({
                "file_path": "src/lib.rs",
                "edits": [{"old_string": "", "new_string": "again"}]
            }),
        )
        .await;
        assert!(resp.content.starts_with("file already exists"));
    }

    #[tokio::test]
    async fn crlf_line_endings_survive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("win.txt"), "one\r\ntwo\r\n").unwrap();

        let resp = multiedit(
            dir.path(),
            serde_json::json!({
                "file_path": "win.txt",
                "edits": [{"old_string": "one\ntwo", "new_string": "uno\ndos"}]
            }),
        )
        .await;
        assert!(!resp.is_error, "{}", resp.content);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("win.txt")).unwrap(),
            "uno\r\ndos\r\n"
        );
    }

    #[tokio::test]
    async fn rejects_invalid_edit_lists() {
        let dir = tempfile::tempdir().unwrap();
        let cases = [
            (
                serde_json::json!({"file_path": "f.txt", "edits": []}),
                "at least one edit is required",
            ),
            (
                serde_json::json!({"file_path": "f.txt", "edits": [{"old_string": "a", "new_string": "a"}]}),
                "edit 1: old_string and new_string are identical",
            ),
            (
                serde_json::json!({"file_path": "f.txt", "edits": [
                    {"old_string": "a", "new_string": "b"},
                    {"old_string": "", "new_string": "c"}
                ]}),
                "edit 2: only the first edit can have an empty old_string (for file creation)",
            ),
            (
                serde_json::json!({"edits": [{"old_string": "a", "new_string": "b"}]}),
                "file_path is required",
            ),
        ];
        for (input, expected) in cases {
            let resp = multiedit(dir.path(), input).await;
            assert!(resp.is_error);
            assert_eq!(resp.content, expected);
        }

        let resp = multiedit(
            dir.path(),
            serde_json::json!({"file_path": "missing.txt", "edits": [{"old_string": "a", "new_string": "b"}]}),
        )
        .await;
        assert!(resp.content.starts_with("file does not exist"));
    }
}
