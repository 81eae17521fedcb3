//! Path handling shared by the filesystem tools.
//!
//! Relative paths resolve against the tool's working directory, `~/`
//! expands to the home directory, and writes to credential locations are
//! refused.

use std::path::{Component, Path, PathBuf};

/// Prefixes no tool may write under. `~` is expanded.
pub const FORBIDDEN_WRITE_PATHS: &[&str] = &[
    "~/.ssh",
    "~/.gnupg",
    "~/.aws",
    "~/.config/gcloud",
    "~/.taskloom/config.toml",
    "/etc/shadow",
    "/etc/passwd",
    "/etc/sudoers",
];

/// Directories skipped by listing and searching tools.
pub const SKIPPED_DIRS: &[&str] = &[
    "node_modules",
    "__pycache__",
    "target",
    "venv",
    "dist",
];

/// Resolve a user-supplied path against `working_dir`.
pub fn resolve(working_dir: &Path, raw: &str) -> PathBuf {
    let expanded = match raw.strip_prefix("~/") {
        Some(rest) => match home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(raw),
        },
        None => PathBuf::from(raw),
    };

    let joined = if expanded.is_absolute() {
        expanded
    } else {
        working_dir.join(expanded)
    };
    normalize(&joined)
}

/// Lexically remove `.` and `..` components.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// The forbidden prefix `path` falls under, if any.
pub fn forbidden_prefix(path: &Path) -> Option<&'static str> {
    let normalized = normalize(path);
    FORBIDDEN_WRITE_PATHS.iter().copied().find(|prefix| {
        let expanded = match prefix.strip_prefix("~/") {
            Some(rest) => match home_dir() {
                Some(home) => home.join(rest),
                None => return false,
            },
            None => PathBuf::from(prefix),
        };
        normalized.starts_with(&expanded)
    })
}

/// Whether any component of `path` below `root` is hidden (dot-prefixed).
pub fn is_hidden(root: &Path, path: &Path) -> bool {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .any(|c| matches!(c, Component::Normal(name) if name.to_string_lossy().starts_with('.')))
}

/// Whether a directory name is in the skipped set.
pub fn is_skipped_dir(name: &str) -> bool {
    SKIPPED_DIRS.contains(&name)
}

/// Truncate to at most `max` characters, on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> Option<&str> {
    text.char_indices().nth(max).map(|(idx, _)| &text[..idx])
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE").ok().map(PathBuf::from)
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok().map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_join_working_dir() {
        let resolved = resolve(Path::new("/work"), "src/../lib.rs");
        assert_eq!(resolved, PathBuf::from("/work/lib.rs"));
    }

    #[test]
    fn absolute_paths_are_kept() {
        assert_eq!(resolve(Path::new("/work"), "/tmp/x"), PathBuf::from("/tmp/x"));
    }

    #[test]
    fn credential_paths_are_forbidden() {
        assert_eq!(forbidden_prefix(Path::new("/etc/shadow")), Some("/etc/shadow"));
        assert!(forbidden_prefix(Path::new("/tmp/notes.txt")).is_none());
        if let Some(home) = home_dir() {
            assert!(forbidden_prefix(&home.join(".ssh/id_rsa")).is_some());
        }
    }

    #[test]
    fn hidden_detection_is_relative_to_root() {
        let root = Path::new("/home/me/.projects/app");
        assert!(!is_hidden(root, &root.join("src/main.rs")));
        assert!(is_hidden(root, &root.join(".git/config")));
    }

    #[test]
    fn truncate_on_char_boundary() {
        assert_eq!(truncate_chars("héllo", 2), Some("hé"));
        assert_eq!(truncate_chars("hi", 5), None);
    }
}
