//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! of the chatsync crates:
//! - All engine state is driven from one async task; nothing blocks a thread
//! - Timers are tokio timers, never `std::thread::sleep`
//! - No ad-hoc OS threads or nested runtimes in production code
//!
//! The helpers below scan production sources line by line. Everything from the
//! first `#[cfg(test)]` line of a file onward is treated as test code.

use std::fs;
use std::path::{Path, PathBuf};

/// A forbidden pattern found in production code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the match
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The offending line, trimmed
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// Production source roots, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["chatsync/core/src", "chatsync/cli/src"];

/// Workspace root, derived from this package's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// Every `.rs` file under the production roots
#[must_use]
pub fn production_sources() -> Vec<PathBuf> {
    let root = workspace_root();
    PRODUCTION_DIRS
        .iter()
        .map(|dir| root.join(dir))
        .filter(|dir| dir.exists())
        .flat_map(|dir| {
            walkdir::WalkDir::new(dir)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
                .map(walkdir::DirEntry::into_path)
        })
        .collect()
}

/// Lines of production code (comments stripped) in `content`
pub fn production_lines(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(|(idx, line)| (idx + 1, line.split("//").next().unwrap_or(line)))
}

/// Find lines in production code containing any of `patterns`
#[must_use]
pub fn find_violations(patterns: &[&str]) -> Vec<Violation> {
    let mut violations = Vec::new();

    for path in production_sources() {
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        for (line, code) in production_lines(&content) {
            if patterns.iter().any(|p| code.contains(p)) {
                violations.push(Violation {
                    path: path.clone(),
                    line,
                    text: code.trim().to_string(),
                });
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let source = "fn a() {}\n// thread::sleep in a comment\n#[cfg(test)]\nmod tests { fn b() {} }\n";
        let lines: Vec<_> = production_lines(source).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], (2, ""));
    }

    #[test]
    fn test_sources_found() {
        assert!(!production_sources().is_empty());
    }
}
