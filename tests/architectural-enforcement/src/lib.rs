//! Architectural Enforcement Integration Tests
//!
//! Source scanners shared by the tests in `tests/`. Each test walks the
//! production sources of the workspace and reports rule violations:
//! - No sleep outside the timer scheduler
//! - No blocking I/O inside async functions
//! - No panicking shortcuts in production code
//!
//! The scanners work line by line on the raw text. They are heuristics, not
//! a parser, and are tuned to the layout `rustfmt` produces.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["courier/core/src", "courier/cli/src"];

/// Workspace root, resolved from this crate's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// A loaded Rust source file
pub struct SourceFile {
    pub path: PathBuf,
    pub lines: Vec<String>,
}

impl SourceFile {
    /// Whether the file path ends with `suffix` (e.g. `"src/timer.rs"`)
    #[must_use]
    pub fn ends_with(&self, suffix: &str) -> bool {
        self.path.ends_with(suffix)
    }

    /// Index of the first line of the `#[cfg(test)]` module, if any
    ///
    /// Everything from this line on is treated as test code.
    #[must_use]
    pub fn test_module_start(&self) -> Option<usize> {
        self.lines.iter().enumerate().find_map(|(idx, line)| {
            let next = self.lines.get(idx + 1).map(|l| l.trim_start());
            (line.trim() == "#[cfg(test)]" && next.is_some_and(|l| l.starts_with("mod ")))
                .then_some(idx)
        })
    }

    /// Whether line `idx` belongs to test code
    #[must_use]
    pub fn is_test_line(&self, idx: usize) -> bool {
        self.test_module_start().is_some_and(|start| idx >= start)
            || is_in_test_function(&self.lines, idx)
    }

    /// `path:line - text` for a violation report
    #[must_use]
    pub fn describe(&self, idx: usize) -> String {
        let text = self.lines.get(idx).map_or("", |l| l.trim());
        format!("{}:{} - {}", self.path.display(), idx + 1, text)
    }
}

/// Load every `.rs` file under `dir` (relative to the workspace root)
///
/// # Panics
///
/// Panics if the directory does not exist, so a moved crate cannot turn a
/// scan into a silent pass.
#[must_use]
pub fn load_sources(dir: &str) -> Vec<SourceFile> {
    let root = workspace_root().join(dir);
    assert!(root.exists(), "source directory missing: {}", root.display());

    let mut files: Vec<SourceFile> = walkdir::WalkDir::new(&root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .filter_map(|e| {
            let content = fs::read_to_string(e.path()).ok()?;
            Some(SourceFile {
                path: e.path().to_path_buf(),
                lines: content.lines().map(str::to_owned).collect(),
            })
        })
        .collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

/// The code portion of a line, without a trailing `//` comment
///
/// Doc comments and full-line comments yield an empty string.
#[must_use]
pub fn code_part(line: &str) -> &str {
    let trimmed = line.trim_start();
    if trimmed.starts_with("//") {
        return "";
    }
    // `://` appears in URL literals, not comments
    let mut search = 0;
    while let Some(pos) = line[search..].find("//") {
        let at = search + pos;
        if at > 0 && line.as_bytes()[at - 1] == b':' {
            search = at + 2;
            continue;
        }
        return &line[..at];
    }
    line
}

/// Kind of function a signature line declares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnKind {
    Sync,
    Async,
}

/// Classify `line` as a function signature, if it is one
#[must_use]
pub fn fn_signature(line: &str) -> Option<FnKind> {
    let mut rest = line.trim_start();
    for prefix in ["pub(crate) ", "pub(super) ", "pub ", "const ", "unsafe "] {
        rest = rest.strip_prefix(prefix).unwrap_or(rest);
    }
    if rest.starts_with("async fn ") {
        Some(FnKind::Async)
    } else if rest.starts_with("fn ") {
        Some(FnKind::Sync)
    } else {
        None
    }
}

/// Nearest enclosing function signature above `current_idx`
#[must_use]
pub fn enclosing_fn<S: AsRef<str>>(lines: &[S], current_idx: usize) -> Option<(usize, FnKind)> {
    (0..current_idx)
        .rev()
        .find_map(|i| fn_signature(lines[i].as_ref()).map(|kind| (i, kind)))
}

/// Check if line is inside a test function
#[must_use]
pub fn is_in_test_function<S: AsRef<str>>(lines: &[S], current_idx: usize) -> bool {
    let Some((fn_idx, _)) = enclosing_fn(lines, current_idx) else {
        return false;
    };

    for i in (0..fn_idx).rev() {
        let line = lines[i].as_ref().trim();
        if line.starts_with("#[test]") || line.starts_with("#[tokio::test") {
            return true;
        }
        if !line.starts_with("#[") {
            break;
        }
    }
    false
}

/// Check if line is inside an async function
#[must_use]
pub fn is_in_async_function<S: AsRef<str>>(lines: &[S], current_idx: usize) -> bool {
    matches!(enclosing_fn(lines, current_idx), Some((_, FnKind::Async)))
}

/// Check if an `async move` block opens between the enclosing function and
/// `current_idx`
#[must_use]
pub fn is_in_async_block<S: AsRef<str>>(lines: &[S], current_idx: usize) -> bool {
    let start = enclosing_fn(lines, current_idx).map_or(0, |(idx, _)| idx);
    (start..current_idx).any(|i| code_part(lines[i].as_ref()).contains("async move"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_signature_detection() {
        assert_eq!(fn_signature("    pub async fn connect("), Some(FnKind::Async));
        assert_eq!(fn_signature("pub(crate) fn load() {"), Some(FnKind::Sync));
        assert_eq!(fn_signature("fn main() {"), Some(FnKind::Sync));
        assert_eq!(fn_signature("    let f = fn_ptr;"), None);
    }

    #[test]
    fn test_code_part_strips_comments() {
        assert_eq!(code_part("let a = 1; // note"), "let a = 1; ");
        assert_eq!(code_part("    /// docs mention std::fs::read"), "");
        assert_eq!(
            code_part(r#"let u = "ws://host/ws/";"#),
            r#"let u = "ws://host/ws/";"#
        );
    }

    #[test]
    fn test_test_function_detection() {
        let code = [
            "#[tokio::test(start_paused = true)]",
            "async fn test_something() {",
            "    tokio::time::sleep(d).await;",
            "}",
        ];
        assert!(is_in_test_function(&code, 2));

        let code = ["pub fn helper() {", "    tokio::time::sleep(d);", "}"];
        assert!(!is_in_test_function(&code, 1));
    }

    #[test]
    fn test_async_context_detection() {
        let code = [
            "fn schedule(&self) {",
            "    tokio::spawn(async move {",
            "        work().await;",
            "    });",
            "}",
        ];
        assert!(!is_in_async_function(&code, 2));
        assert!(is_in_async_block(&code, 2));
    }

    #[test]
    fn test_workspace_root_has_sources() {
        for dir in PRODUCTION_DIRS {
            assert!(workspace_root().join(dir).exists(), "{dir}");
        }
    }
}
