//! Edit tool: exact string replacement inside a file.
//!
//! An empty `old_string` creates a new file and an empty `new_string`
//! deletes the matched text. Ambiguous matches are refused unless
//! `replace_all` is set.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use taskloom_core::error::ToolError;
use taskloom_core::tool::{Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};
use tracing::debug;

use crate::paths;
use crate::write::{FileChangeMetadata, check_writable, line_changes};

pub const EDIT_TOOL_NAME: &str = "edit";

const DESCRIPTION: &str = "Edits files by replacing text, creating new files, or deleting content.

HOW TO USE:
- file_path: path to the file to modify or create
- old_string: the text to replace (must match exactly, including whitespace)
- new_string: the replacement text
- replace_all: replace every occurrence instead of requiring a unique match

SPECIAL CASES:
- To create a new file: leave old_string empty and put the file contents in new_string
- To delete content: provide old_string and leave new_string empty";

#[derive(Debug, Deserialize)]
struct EditParams {
    #[serde(default)]
    file_path: String,
    #[serde(default)]
    old_string: String,
    #[serde(default)]
    new_string: String,
    #[serde(default)]
    replace_all: bool,
}

pub struct EditTool {
    working_dir: PathBuf,
}

impl EditTool {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }
}

fn failed(reason: impl std::fmt::Display) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: EDIT_TOOL_NAME.into(),
        reason: reason.to_string(),
    }
}

fn change_metadata(path: &Path, old: &str, new: &str) -> FileChangeMetadata {
    let (additions, removals) = line_changes(old, new);
    FileChangeMetadata {
        file_path: path.display().to_string(),
        additions,
        removals,
    }
}

/// Replace `old` in `content`, returning the new text and how many
/// occurrences changed. A missing or ambiguous match is an error message
/// for the model.
pub(crate) fn replace_in(
    content: &str,
    old: &str,
    new: &str,
    replace_all: bool,
) -> Result<(String, usize), String> {
    let occurrences = content.matches(old).count();
    if occurrences == 0 {
        return Err(
            "old_string not found in file. Make sure it matches exactly, including whitespace and line breaks"
                .into(),
        );
    }
    if occurrences > 1 && !replace_all {
        return Err(format!(
            "old_string appears {occurrences} times in the file. Use replace_all=true or provide more context"
        ));
    }

    let replaced = if replace_all {
        content.replace(old, new)
    } else {
        content.replacen(old, new, 1)
    };
    Ok((replaced, occurrences))
}

async fn create_file(path: &Path, content: &str) -> Result<ToolResponse, ToolError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => {
            return Ok(ToolResponse::error(format!(
                "path is a directory, not a file: {}",
                path.display()
            )));
        }
        Ok(_) => {
            return Ok(ToolResponse::error(format!(
                "file already exists: {}",
                path.display()
            )));
        }
        Err(_) => {}
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| failed(format!("failed to create parent directories: {e}")))?;
    }
    tokio::fs::write(path, content)
        .await
        .map_err(|e| failed(format!("failed to write file: {e}")))?;

    Ok(ToolResponse::text(format!("File created: {}", path.display()))
        .with_metadata(&change_metadata(path, "", content)))
}

async fn replace_content(path: &Path, params: &EditParams) -> Result<ToolResponse, ToolError> {
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
                "file does not exist: {}",
                path.display()
            )));
        }
    }

    let old_content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| failed(format!("failed to read file: {e}")))?;

    let (new_content, occurrences) = match replace_in(
        &old_content,
        &params.old_string,
        &params.new_string,
        params.replace_all,
    ) {
        Ok(replaced) => replaced,
        Err(reason) => return Ok(ToolResponse::error(reason)),
    };
    if new_content == old_content {
        return Ok(ToolResponse::error(
            "new content is the same as old content. No changes made.",
        ));
    }

    tokio::fs::write(path, &new_content)
        .await
        .map_err(|e| failed(format!("failed to write file: {e}")))?;
    debug!(path = %path.display(), occurrences, "File edited");

    let message = if params.new_string.is_empty() {
        format!(
            "Content deleted from file: {} ({occurrences} occurrence(s) removed)",
            path.display()
        )
    } else {
        format!(
            "File successfully edited: {} ({occurrences} occurrence(s) replaced)",
            path.display()
        )
    };
    Ok(ToolResponse::text(message).with_metadata(&change_metadata(path, &old_content, &new_content)))
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        EDIT_TOOL_NAME
    }

    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: EDIT_TOOL_NAME.into(),
            description: DESCRIPTION.into(),
            parameters: serde_json::json!({
                "file_path": {
                    "type": "string",
                    "description": "The path to the file to modify"
                },
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
                    "description": "Replace all occurrences of old_string (default false)"
                }
            }),
            required: vec![
                "file_path".into(),
                "old_string".into(),
                "new_string".into(),
            ],
        }
    }

    async fn run(&self, _ctx: &ToolContext, call: ToolCall) -> Result<ToolResponse, ToolError> {
        let params: EditParams = call.parse_input()?;
        if params.file_path.is_empty() {
            return Ok(ToolResponse::error("file_path is required"));
        }
        if params.old_string.is_empty() && params.new_string.is_empty() {
            return Ok(ToolResponse::error(
                "either old_string or new_string must be provided",
            ));
        }
        if params.old_string == params.new_string {
            return Ok(ToolResponse::error(
                "old_string and new_string are identical. No changes needed.",
            ));
        }

        let path = paths::resolve(&self.working_dir, &params.file_path);
        check_writable(EDIT_TOOL_NAME, &path)?;

        if params.old_string.is_empty() {
            create_file(&path, &params.new_string).await
        } else {
            replace_content(&path, &params).await
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

    async fn edit(dir: &Path, input: serde_json::Value) -> ToolResponse {
        EditTool::new(dir)
            .run(
                &ctx(),
                ToolCall {
                    id: "c1".into(),
                    name: EDIT_TOOL_NAME.into(),
                    input: input.to_string(),
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn replaces_unique_match() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.rs"), "fn a() {}\nfn b() {}\n").unwrap();
        let resp = edit(
            dir.path(),
            serde_json::json!({"file_path": "f.rs", "old_string": "fn a()", "new_string": "fn z()"}),
        )
        .await;
        assert!(!resp.is_error, "{}", resp.content);
        assert!(resp.content.contains("(1 occurrence(s) replaced)"));
        let body = std::fs::read_to_string(dir.path().join("f.rs")).unwrap();
        assert_eq!(body, "fn z() {}\nfn b() {}\n");
    }

    #[tokio::test]
    async fn ambiguous_match_requires_replace_all() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "x x x").unwrap();
        let resp = edit(
            dir.path(),
            serde_json::json!({"file_path": "f.txt", "old_string": "x", "new_string": "y"}),
        )
        .await;
        assert!(resp.is_error);
        assert!(resp.content.starts_with("old_string appears 3 times"));

        let resp = edit(
            dir.path(),
            serde_json::json!({"file_path": "f.txt", "old_string": "x", "new_string": "y", "replace_all": true}),
        )
        .await;
        assert!(resp.content.contains("(3 occurrence(s) replaced)"));
        assert_eq!(std::fs::read_to_string(dir.path().join("f.txt")).unwrap(), "y y y");
    }

    #[tokio::test]
    async fn empty_old_string_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let resp = edit(
            dir.path(),
            serde_json::json!({"file_path": "new/file.md", "old_string": "", "new_string": "# hi"}),
        )
        .await;
        assert!(resp.content.starts_with("File created: "));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("new/file.md")).unwrap(),
            "# hi"
        );

        let resp = edit(
            dir.path(),
            serde_json::json!({"file_path": "new/file.md", "old_string": "", "new_string": "again"}),
        )
        .await;
        assert!(resp.is_error);
        assert!(resp.content.starts_with("file already exists"));
    }

    #[tokio::test]
    async fn empty_new_string_deletes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "keep drop keep").unwrap();
        let resp = edit(
            dir.path(),
            serde_json::json!({"file_path": "f.txt", "old_string": " drop", "new_string": ""}),
        )
        .await;
        assert!(resp.content.starts_with("Content deleted from file"));
        assert_eq!(std::fs::read_to_string(dir.path().join("f.txt")).unwrap(), "keep keep");
    }

    #[tokio::test]
    async fn rejects_bad_requests() {
        let dir = tempfile::tempdir().unwrap();
        let resp = edit(
            dir.path(),
            serde_json::json!({"file_path": "f.txt", "old_string": "a", "new_string": "a"}),
        )
        .await;
        assert_eq!(resp.content, "old_string and new_string are identical. No changes needed.");

        let resp = edit(dir.path(), serde_json::json!({"file_path": "f.txt"})).await;
        assert_eq!(resp.content, "either old_string or new_string must be provided");

        let resp = edit(
            dir.path(),
            serde_json::json!({"file_path": "missing.txt", "old_string": "a", "new_string": "b"}),
        )
        .await;
        assert!(resp.content.starts_with("file does not exist"));
    }

    #[tokio::test]
    async fn missing_text_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "hello").unwrap();
        let resp = edit(
            dir.path(),
            serde_json::json!({"file_path": "f.txt", "old_string": "bye", "new_string": "x"}),
        )
        .await;
        assert!(resp.is_error);
        assert!(resp.content.starts_with("old_string not found in file"));
    }
}
