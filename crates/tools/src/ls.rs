//! Ls tool: render a directory as an indented tree.

use async_trait::async_trait;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use taskloom_core::error::ToolError;
use taskloom_core::tool::{Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};
use walkdir::WalkDir;

use crate::paths;

pub const LS_TOOL_NAME: &str = "ls";

const MAX_LS_FILES: usize = 1000;
const DEFAULT_IGNORES: &[&str] = &[".*", "__pycache__", "node_modules", ".git"];

const DESCRIPTION: &str = "Directory listing tool that shows files and subdirectories in a tree structure.

HOW TO USE:
- Provide a path to list (defaults to the working directory)
- Optionally specify glob patterns to ignore

LIMITATIONS:
- Results are limited to 1000 files
- Hidden files (starting with '.') are skipped";

#[derive(Debug, Deserialize)]
struct LsParams {
    #[serde(default)]
    path: String,
    #[serde(default)]
    ignore: Vec<String>,
}

#[derive(Debug, Serialize)]
struct LsMetadata {
    number_of_files: usize,
    truncated: bool,
}

#[derive(Debug)]
struct Listing {
    lines: Vec<String>,
    entries: usize,
    truncated: bool,
}

pub struct LsTool {
    working_dir: PathBuf,
}

impl LsTool {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }
}

fn compile_ignores(extra: &[String]) -> Vec<Pattern> {
    DEFAULT_IGNORES
        .iter()
        .copied()
        .chain(extra.iter().map(String::as_str))
        .filter_map(|p| Pattern::new(p).ok())
        .collect()
}

/// Depth-first walk in name order, stopping after `limit` entries.
fn list_tree(root: &Path, ignores: &[Pattern], limit: usize) -> Listing {
    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !ignores.iter().any(|p| p.matches(&name))
        });

    let mut lines = Vec::new();
    let mut truncated = false;
    for entry in walker.filter_map(Result::ok) {
        if lines.len() >= limit {
            truncated = true;
            break;
        }
        let indent = "  ".repeat(entry.depth());
        let name = entry.file_name().to_string_lossy();
        let suffix = if entry.file_type().is_dir() { "/" } else { "" };
        lines.push(format!("{indent}- {name}{suffix}"));
    }

    Listing {
        entries: lines.len(),
        lines,
        truncated,
    }
}

fn render(root: &Path, listing: &Listing) -> String {
    let mut output = String::new();
    if listing.truncated {
        output.push_str(&format!(
            "There are more than {MAX_LS_FILES} files in the directory. Use a more specific path \
or use the Glob tool to find specific files. The first {MAX_LS_FILES} files and directories \
are included below:\n\n"
        ));
    }

    let root_name = root.display().to_string();
    output.push_str(&format!("- {}/\n", root_name.trim_end_matches('/')));
    if listing.lines.is_empty() {
        output.push_str("  (empty)\n");
    }
    for line in &listing.lines {
        output.push_str(line);
        output.push('\n');
    }
    output
}

#[async_trait]
impl Tool for LsTool {
    fn name(&self) -> &str {
        LS_TOOL_NAME
    }

    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: LS_TOOL_NAME.into(),
            description: DESCRIPTION.into(),
            parameters: serde_json::json!({
                "path": {
                    "type": "string",
                    "description": "The path to the directory to list (defaults to the working directory)"
                },
                "ignore": {
                    "type": "array",
                    "description": "List of glob patterns to ignore",
                    "items": { "type": "string" }
                }
            }),
            required: vec!["path".into()],
        }
    }

    async fn run(&self, _ctx: &ToolContext, call: ToolCall) -> Result<ToolResponse, ToolError> {
        let params: LsParams = call.parse_input()?;
        let raw = if params.path.is_empty() { "." } else { params.path.as_str() };
        let root = paths::resolve(&self.working_dir, raw);

        match tokio::fs::metadata(&root).await {
            Ok(meta) if !meta.is_dir() => {
                return Ok(ToolResponse::error(format!(
                    "not a directory: {}",
                    root.display()
                )));
            }
            Ok(_) => {}
            Err(_) => {
                return Ok(ToolResponse::error(format!(
                    "path does not exist: {}",
                    root.display()
                )));
            }
        }

        let ignores = compile_ignores(&params.ignore);
        let walk_root = root.clone();
        let listing =
            tokio::task::spawn_blocking(move || list_tree(&walk_root, &ignores, MAX_LS_FILES))
                .await
                .map_err(|e| ToolError::ExecutionFailed {
                    tool_name: LS_TOOL_NAME.into(),
                    reason: format!("listing task failed: {e}"),
                })?;

        Ok(ToolResponse::text(render(&root, &listing)).with_metadata(&LsMetadata {
            number_of_files: listing.entries,
            truncated: listing.truncated,
        }))
    }
}
