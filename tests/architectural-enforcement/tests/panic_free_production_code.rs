//! Integration Test: Panic-Free Production Code
//!
//! **Policy**: Production code propagates errors with `?` and typed error
//! enums. `unwrap()`, `expect()`, `panic!`, `todo!` and `unimplemented!` are
//! confined to tests and to the `test_utils` support module.

use architectural_enforcement::{code_part, load_sources, PRODUCTION_DIRS};

const FORBIDDEN: &[&str] = &[
    ".unwrap()",
    ".expect(",
    "panic!(",
    "todo!(",
    "unimplemented!(",
];

/// Test support, compiled into the library for downstream test suites
const EXEMPT_FILES: &[&str] = &["courier/core/src/test_utils.rs"];

#[test]
fn test_no_panicking_shortcuts_in_production_code() {
    let mut violations = Vec::new();

    for dir in PRODUCTION_DIRS {
        for file in load_sources(dir) {
            if EXEMPT_FILES.iter().any(|f| file.ends_with(f)) {
                continue;
            }
            for (idx, line) in file.lines.iter().enumerate() {
                let code = code_part(line);
                if FORBIDDEN.iter().any(|p| code.contains(p)) && !file.is_test_line(idx) {
                    violations.push(file.describe(idx));
                }
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\n❌ Panicking shortcuts found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Return a typed error and propagate it with `?`.");
        panic!("\nFound {} violation(s).", violations.len());
    }
}
