//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async code MUST NOT use blocking I/O.
//! **Required**: `tokio::net`, `tokio::io`, and async `reqwest`, not
//! `std::net`, `std::io::stdin()`, or `reqwest::blocking`.
//!
//! Blocking file reads stay acceptable in synchronous functions that run
//! before the connection starts, such as configuration loading.

use architectural_enforcement::{
    code_part, is_in_async_block, is_in_async_function, load_sources, SourceFile,
    PRODUCTION_DIRS,
};

/// Blocking call patterns forbidden anywhere in production code
const ALWAYS_FORBIDDEN: &[(&str, &str)] = &[
    ("std::net::", "Blocking network I/O"),
    ("use std::net", "Blocking network I/O"),
    ("reqwest::blocking", "Blocking HTTP client"),
    ("std::thread::sleep", "Blocking sleep"),
];

/// Blocking call patterns forbidden inside async code
const ASYNC_FORBIDDEN: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("std::io::stdin()", "Blocking stdin"),
    ("std::io::stdout()", "Blocking stdout"),
    ("std::process::Command", "Blocking process I/O"),
];

fn check_file(file: &SourceFile, violations: &mut Vec<String>) {
    for (idx, line) in file.lines.iter().enumerate() {
        if file.is_test_line(idx) {
            continue;
        }
        let code = code_part(line);

        for (pattern, label) in ALWAYS_FORBIDDEN {
            if code.contains(pattern) {
                violations.push(format!("{label}: {}", file.describe(idx)));
            }
        }

        let in_async =
            is_in_async_function(&file.lines, idx) || is_in_async_block(&file.lines, idx);
        if !in_async {
            continue;
        }
        for (pattern, label) in ASYNC_FORBIDDEN {
            if code.contains(pattern) {
                violations.push(format!("{label}: {}", file.describe(idx)));
            }
        }
    }
}

/// Test that production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_production_code() {
    let mut violations = Vec::new();
    for dir in PRODUCTION_DIRS {
        for file in load_sources(dir) {
            check_file(&file, &mut violations);
        }
    }

    if !violations.is_empty() {
        eprintln!("\n❌ Blocking I/O calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - tokio::io::stdin() with AsyncBufReadExt");
        eprintln!("  - tokio_tungstenite::connect_async(..).await");
        eprintln!("  - reqwest::Client::post(..).send().await");
        panic!(
            "\nFound {} blocking I/O violation(s) in production code.",
            violations.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn source(code: &[&str]) -> SourceFile {
        SourceFile {
            path: PathBuf::from("sample.rs"),
            lines: code.iter().map(|l| (*l).to_owned()).collect(),
        }
    }

    #[test]
    fn test_blocking_read_in_async_fn_flagged() {
        let file = source(&[
            "pub async fn connect(&self) {",
            "    let contents = std::fs::read_to_string(\"ticket\");",
            "}",
        ]);
        let mut violations = Vec::new();
        check_file(&file, &mut violations);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].starts_with("Blocking file I/O"));
    }

    #[test]
    fn test_blocking_read_in_sync_fn_allowed() {
        let file = source(&[
            "pub fn load_config_from_path(path: Option<PathBuf>) -> Result<(), Error> {",
            "    let toml_content = std::fs::read_to_string(config_path)?;",
            "}",
        ]);
        let mut violations = Vec::new();
        check_file(&file, &mut violations);
        assert!(violations.is_empty());
    }

    #[test]
    fn test_std_net_always_flagged() {
        let file = source(&["fn open() {", "    let s = std::net::TcpStream::connect(a);", "}"]);
        let mut violations = Vec::new();
        check_file(&file, &mut violations);
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn test_test_code_skipped() {
        let file = source(&[
            "#[cfg(test)]",
            "mod tests {",
            "    async fn helper() {",
            "        let l = std::net::TcpListener::bind(a);",
            "    }",
            "}",
        ]);
        let mut violations = Vec::new();
        check_file(&file, &mut violations);
        assert!(violations.is_empty());
    }
}
