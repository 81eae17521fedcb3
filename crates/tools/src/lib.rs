//! Built-in tool implementations for Taskloom.
//!
//! Tools give an agent the ability to work inside a project directory:
//! read, write and edit files, list and search the tree, run shell
//! commands, and fetch URLs.

pub mod bash;
pub mod edit;
pub mod fetch;
pub mod file_glob;
pub mod grep;
pub mod ls;
pub mod multiedit;
pub mod paths;
pub mod view;
pub mod write;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use taskloom_core::tool::ToolRegistry;

pub use bash::BashTool;
pub use edit::EditTool;
pub use fetch::FetchTool;
pub use file_glob::GlobTool;
pub use grep::GrepTool;
pub use ls::LsTool;
pub use multiedit::MultiEditTool;
pub use view::ViewTool;
pub use write::WriteTool;

/// Knobs shared by the built-in tools.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub working_dir: PathBuf,
    /// Extra command prefixes the bash tool refuses.
    pub blocked_commands: Vec<String>,
    pub bash_timeout: Duration,
}

impl ToolSettings {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            blocked_commands: Vec::new(),
            bash_timeout: Duration::from_secs(60),
        }
    }
}

/// Create a registry with every built-in tool rooted at the configured
/// working directory.
///
/// Security defaults:
/// - Bash: network, privilege and destructive commands are refused
/// - Write/edit/multiedit: credential paths (~/.ssh, /etc/shadow, ...) are refused
pub fn default_registry(settings: &ToolSettings) -> ToolRegistry {
    let dir = &settings.working_dir;
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(
        BashTool::new(dir.clone())
            .with_blocked_commands(settings.blocked_commands.clone())
            .with_default_timeout(settings.bash_timeout),
    ));
    registry.register(Arc::new(EditTool::new(dir.clone())));
    registry.register(Arc::new(FetchTool::new()));
    registry.register(Arc::new(GlobTool::new(dir.clone())));
    registry.register(Arc::new(GrepTool::new(dir.clone())));
    registry.register(Arc::new(LsTool::new(dir.clone())));
    registry.register(Arc::new(MultiEditTool::new(dir.clone())));
    registry.register(Arc::new(ViewTool::new(dir.clone())));
    registry.register(Arc::new(WriteTool::new(dir.clone())));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_all_tools() {
        let registry = default_registry(&ToolSettings::new("/tmp"));
        assert_eq!(
            registry.names(),
            vec![
                "bash",
                "edit",
                "fetch",
                "glob",
                "grep",
                "ls",
                "multiedit",
                "view",
                "write"
            ]
        );
    }

    #[test]
    fn definitions_wrap_parameters_in_object_schema() {
        let registry = default_registry(&ToolSettings::new("/tmp"));
        for def in registry.definitions() {
            assert_eq!(def.parameters["type"], "object", "{}", def.name);
            assert!(def.parameters["properties"].is_object(), "{}", def.name);
        }
    }
}
