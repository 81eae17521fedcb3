//! Grep tool: regex search across file contents.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use taskloom_core::error::ToolError;
use taskloom_core::tool::{Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};
use walkdir::WalkDir;

use crate::file_glob::expand_braces;
use crate::paths;

pub const GREP_TOOL_NAME: &str = "grep";

const MAX_GREP_RESULTS: usize = 100;
const MAX_LINE_LENGTH: usize = 500;
const BINARY_CHECK_SIZE: usize = 8192;

const DESCRIPTION: &str = "Fast content search tool that finds files containing specific text \
or regex patterns.

HOW TO USE:
- Provide a regex pattern to search for within file contents
- Optionally specify a starting directory (defaults to the working directory)
- Optionally provide an include pattern to filter which files to search (eg. \"*.js\", \"*.{ts,tsx}\")
- Results are grouped by file, most recently modified first

LIMITATIONS:
- Results are limited to 100 matches
- Binary and hidden files are skipped";

#[derive(Debug, Deserialize)]
struct GrepParams {
    #[serde(default)]
    pattern: String,
    #[serde(default)]
    path: String,
    #[serde(default, alias = "include_pattern")]
    include: Option<String>,
}

#[derive(Debug, Serialize)]
struct GrepMetadata {
    number_of_matches: usize,
    truncated: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct GrepMatch {
    path: PathBuf,
    modified: SystemTime,
    line_number: usize,
    line: String,
}

pub struct GrepTool {
    working_dir: PathBuf,
}

impl GrepTool {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }
}

fn is_binary_file(path: &Path) -> bool {
    let Ok(mut file) = std::fs::File::open(path) else {
        return true;
    };
    let mut buffer = vec![0u8; BINARY_CHECK_SIZE];
    match file.read(&mut buffer) {
        Ok(n) => buffer[..n].contains(&0),
        Err(_) => true,
    }
}

fn include_patterns(include: Option<&str>) -> Vec<glob::Pattern> {
    include
        .map(|raw| {
            expand_braces(raw)
                .iter()
                .filter_map(|p| glob::Pattern::new(p).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn search(root: &Path, regex: &Regex, include: &[glob::Pattern]) -> (Vec<GrepMatch>, bool) {
    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        if entry.depth() == 0 {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        !(name.starts_with('.') || (entry.file_type().is_dir() && paths::is_skipped_dir(&name)))
    });

    let mut matches = Vec::new();
    for entry in walker.filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !include.is_empty() {
            let name = entry.file_name().to_string_lossy();
            let relative = path.strip_prefix(root).unwrap_or(path);
            if !include
                .iter()
                .any(|p| p.matches(&name) || p.matches_path(relative))
            {
                continue;
            }
        }
        if is_binary_file(path) {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(path) else {
            continue;
        };
        let modified = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .unwrap_or(SystemTime::UNIX_EPOCH);

        for (idx, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                let line = match paths::truncate_chars(line, MAX_LINE_LENGTH) {
                    Some(head) => format!("{head}..."),
                    None => line.to_string(),
                };
                matches.push(GrepMatch {
                    path: path.to_path_buf(),
                    modified,
                    line_number: idx + 1,
                    line,
                });
            }
        }
    }

    // Newest files first; matches within a file keep line order.
    matches.sort_by(|a, b| {
        b.modified
            .cmp(&a.modified)
            .then_with(|| a.path.cmp(&b.path))
            .then_with(|| a.line_number.cmp(&b.line_number))
    });
    let truncated = matches.len() > MAX_GREP_RESULTS;
    matches.truncate(MAX_GREP_RESULTS);
    (matches, truncated)
}

fn render(matches: &[GrepMatch], truncated: bool) -> String {
    let mut output = format!("Found {} matches\n", matches.len());
    let mut current: Option<&Path> = None;
    for m in matches {
        if current != Some(m.path.as_path()) {
            if current.is_some() {
                output.push('\n');
            }
            output.push_str(&format!("{}:\n", m.path.display()));
            current = Some(m.path.as_path());
        }
        output.push_str(&format!("  Line {}: {}\n", m.line_number, m.line));
    }
    if truncated {
        output.push_str(
            "\n(Results are truncated. Consider using a more specific path or pattern.)",
        );
    }
    output
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        GREP_TOOL_NAME
    }

    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: GREP_TOOL_NAME.into(),
            description: DESCRIPTION.into(),
            parameters: serde_json::json!({
                "pattern": {
                    "type": "string",
                    "description": "The regex pattern to search for in file contents"
                },
                "path": {
                    "type": "string",
                    "description": "The directory to search in (defaults to the working directory)"
                },
                "include": {
                    "type": "string",
                    "description": "File pattern to include in the search (e.g. \"*.js\", \"*.{ts,tsx}\")"
                }
            }),
            required: vec!["pattern".into()],
        }
    }

    async fn run(&self, ctx: &ToolContext, call: ToolCall) -> Result<ToolResponse, ToolError> {
        let params: GrepParams = call.parse_input()?;
        if params.pattern.is_empty() {
            return Ok(ToolResponse::error("pattern is required"));
        }
        let regex = match Regex::new(&params.pattern) {
            Ok(regex) => regex,
            Err(e) => return Ok(ToolResponse::error(format!("invalid regex pattern: {e}"))),
        };

        let raw = if params.path.is_empty() { "." } else { params.path.as_str() };
        let root = paths::resolve(&self.working_dir, raw);
        if !root.exists() {
            return Ok(ToolResponse::error(format!(
                "path does not exist: {}",
                root.display()
            )));
        }

        let include = include_patterns(params.include.as_deref());
        let handle = tokio::task::spawn_blocking(move || search(&root, &regex, &include));
        let (matches, truncated) = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(ToolError::Cancelled),
            joined = handle => joined.map_err(|e| ToolError::ExecutionFailed {
                tool_name: GREP_TOOL_NAME.into(),
                reason: format!("search task failed: {e}"),
            })?,
        };

        let metadata = GrepMetadata {
            number_of_matches: matches.len(),
            truncated,
        };
        if matches.is_empty() {
            return Ok(ToolResponse::text("No files found").with_metadata(&metadata));
        }
        Ok(ToolResponse::text(render(&matches, truncated)).with_metadata(&metadata))
    }
}
