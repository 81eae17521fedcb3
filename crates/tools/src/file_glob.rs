//! Glob tool: find files by name pattern, newest first.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use taskloom_core::error::ToolError;
use taskloom_core::tool::{Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};

use crate::paths;

pub const GLOB_TOOL_NAME: &str = "glob";

const MAX_GLOB_RESULTS: usize = 100;

const DESCRIPTION: &str = "Fast file pattern matching tool that finds files by name and pattern, \
returning matching paths sorted by modification time (newest first).

PATTERN SYNTAX:
- '*' matches any sequence of non-separator characters
- '**' matches any sequence of characters, including separators
- '?' matches any single non-separator character
- '{a,b}' matches either alternative

LIMITATIONS:
- Results are limited to 100 files
- Hidden files (starting with '.') are skipped";

#[derive(Debug, Deserialize)]
struct GlobParams {
    #[serde(default)]
    pattern: String,
    #[serde(default)]
    path: String,
}

#[derive(Debug, Serialize)]
struct GlobMetadata {
    number_of_files: usize,
    truncated: bool,
}

pub struct GlobTool {
    working_dir: PathBuf,
}

impl GlobTool {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }
}

/// Expand `{a,b}` alternatives into separate patterns. Nesting is allowed.
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_string()];
    };

    let mut depth = 0;
    let mut close = None;
    let mut splits = Vec::new();
    for (idx, ch) in pattern[open..].char_indices() {
        let idx = open + idx;
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(idx);
                    break;
                }
            }
            ',' if depth == 1 => splits.push(idx),
            _ => {}
        }
    }
    let Some(close) = close else {
        return vec![pattern.to_string()];
    };

    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    let mut bounds = vec![open];
    bounds.extend(splits);
    bounds.push(close);

    bounds
        .windows(2)
        .flat_map(|w| {
            let alternative = &pattern[w[0] + 1..w[1]];
            expand_braces(&format!("{prefix}{alternative}{suffix}"))
        })
        .collect()
}

/// Matching files under `root`, newest first, capped at `limit`.
fn find_files(root: &Path, pattern: &str, limit: usize) -> (Vec<PathBuf>, bool) {
    let options = glob::MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: true,
    };

    let escaped_root = glob::Pattern::escape(&root.to_string_lossy());
    let mut found: Vec<(PathBuf, SystemTime)> = Vec::new();
    for expanded in expand_braces(pattern) {
        let full = format!("{}/{expanded}", escaped_root.trim_end_matches('/'));
        let Ok(entries) = glob::glob_with(&full, options) else {
            continue;
        };
        for path in entries.filter_map(Result::ok) {
            if paths::is_hidden(root, &path) || found.iter().any(|(p, _)| *p == path) {
                continue;
            }
            let Ok(meta) = std::fs::metadata(&path) else {
                continue;
            };
            if meta.is_dir() {
                continue;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((path, modified));
        }
    }

    found.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let truncated = found.len() > limit;
    found.truncate(limit);
    (found.into_iter().map(|(p, _)| p).collect(), truncated)
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        GLOB_TOOL_NAME
    }

    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: GLOB_TOOL_NAME.into(),
            description: DESCRIPTION.into(),
            parameters: serde_json::json!({
                "pattern": {
                    "type": "string",
                    "description": "The glob pattern to match files against"
                },
                "path": {
                    "type": "string",
                    "description": "The directory to search in (defaults to the working directory)"
                }
            }),
            required: vec!["pattern".into()],
        }
    }

    async fn run(&self, _ctx: &ToolContext, call: ToolCall) -> Result<ToolResponse, ToolError> {
        let params: GlobParams = call.parse_input()?;
        if params.pattern.is_empty() {
            return Ok(ToolResponse::error("pattern is required"));
        }

        let raw = if params.path.is_empty() { "." } else { params.path.as_str() };
        let root = paths::resolve(&self.working_dir, raw);
        let pattern = params.pattern.clone();
        let (files, truncated) =
            tokio::task::spawn_blocking(move || find_files(&root, &pattern, MAX_GLOB_RESULTS))
                .await
                .map_err(|e| ToolError::ExecutionFailed {
                    tool_name: GLOB_TOOL_NAME.into(),
                    reason: format!("error finding files: {e}"),
                })?;

        let metadata = GlobMetadata {
            number_of_files: files.len(),
            truncated,
        };
        if files.is_empty() {
            return Ok(ToolResponse::text("No files found").with_metadata(&metadata));
        }

        let mut output = files
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        if truncated {
            output.push_str(
                "\n\n(Results are truncated. Consider using a more specific path or pattern.)",
            );
        }
        Ok(ToolResponse::text(output).with_metadata(&metadata))
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

    async fn glob(dir: &Path, input: serde_json::Value) -> ToolResponse {
        GlobTool::new(dir)
            .run(
                &ctx(),
                ToolCall {
                    id: "c1".into(),
                    name: GLOB_TOOL_NAME.into(),
                    input: input.to_string(),
                },
            )
            .await
            .unwrap()
    }

    #[test]
    fn brace_expansion() {
        assert_eq!(expand_braces("*.rs"), vec!["*.rs"]);
        assert_eq!(expand_braces("*.{rs,toml}"), vec!["*.rs", "*.toml"]);
        assert_eq!(
            expand_braces("{src,tests}/*.{a,b}"),
            vec!["src/*.a", "src/*.b", "tests/*.a", "tests/*.b"]
        );
        assert_eq!(expand_braces("{a,{b,c}}"), vec!["a", "b", "c"]);
        assert_eq!(expand_braces("broken{"), vec!["broken{"]);
    }

    #[tokio::test]
    async fn finds_recursive_matches_and_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::create_dir_all(dir.path().join(".cache")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/nested/mod.rs"), "").unwrap();
        std::fs::write(dir.path().join(".cache/x.rs"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "").unwrap();

        let resp = glob(dir.path(), serde_json::json!({"pattern": "**/*.rs"})).await;
        assert!(resp.content.contains("lib.rs"));
        assert!(resp.content.contains("mod.rs"));
        assert!(!resp.content.contains(".cache"));
        assert!(!resp.content.contains("README"));

        let resp = glob(dir.path(), serde_json::json!({"pattern": "**/*.{rs,md}"})).await;
        assert_eq!(resp.content.lines().count(), 3);
    }

    #[tokio::test]
    async fn no_files_and_missing_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let resp = glob(dir.path(), serde_json::json!({"pattern": "*.zig"})).await;
        assert_eq!(resp.content, "No files found");
        let resp = glob(dir.path(), serde_json::json!({})).await;
        assert!(resp.is_error);
        assert_eq!(resp.content, "pattern is required");
    }

    #[test]
    fn results_are_capped() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("f{i}.txt")), "").unwrap();
        }
        let (files, truncated) = find_files(dir.path(), "*.txt", 3);
        assert_eq!(files.len(), 3);
        assert!(truncated);
    }
}
