//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT sleep. Waiting happens on I/O, on
//! channels, or through a `Scheduler`.
//! **Exception**: `TokioScheduler` in `timer.rs`, which is the one place a
//! delay turns into wall-clock time.
//!
//! Integration tests run on simulated time and MUST NOT sleep at all.

use architectural_enforcement::{code_part, enclosing_fn, load_sources, PRODUCTION_DIRS};

/// The only production file allowed to sleep
const TIMER_FILE: &str = "courier/core/src/timer.rs";

/// Integration test directories
const TEST_DIRS: &[&str] = &["courier/core/tests"];

fn is_sleep_call(code: &str) -> bool {
    code.contains("::sleep(") || code.contains(".sleep(") || code.contains("sleep_until(")
}

/// Whether `idx` sits inside the Tokio scheduler's `schedule` implementation
fn is_scheduler_delay(lines: &[String], idx: usize) -> bool {
    let Some((fn_idx, _)) = enclosing_fn(lines, idx) else {
        return false;
    };
    if !lines[fn_idx].contains("fn schedule(") {
        return false;
    }
    (0..fn_idx)
        .rev()
        .map(|i| lines[i].trim())
        .find(|line| line.starts_with("impl "))
        .is_some_and(|line| line.contains("for TokioScheduler"))
}

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let mut violations = Vec::new();

    for dir in PRODUCTION_DIRS {
        for file in load_sources(dir) {
            for (idx, line) in file.lines.iter().enumerate() {
                if !is_sleep_call(code_part(line)) || file.is_test_line(idx) {
                    continue;
                }
                if file.ends_with(TIMER_FILE) && is_scheduler_delay(&file.lines, idx) {
                    continue;
                }
                violations.push(file.describe(idx));
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\n❌ Sleep calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Schedule delayed work through `Scheduler::schedule` instead.");
        panic!("\nFound {} sleep violation(s).", violations.len());
    }
}

/// Test that integration tests drive time through `ManualScheduler`
#[test]
fn test_no_sleep_in_integration_tests() {
    let mut violations = Vec::new();

    for dir in TEST_DIRS {
        for file in load_sources(dir) {
            for (idx, line) in file.lines.iter().enumerate() {
                if is_sleep_call(code_part(line)) {
                    violations.push(file.describe(idx));
                }
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\n❌ Sleep calls found in integration tests!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Use `scheduler.advance(..)` and `wait_until(..)` instead.");
        panic!("\nFound {} sleep violation(s).", violations.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(code: &[&str]) -> Vec<String> {
        code.iter().map(|l| (*l).to_owned()).collect()
    }

    #[test]
    fn test_scheduler_delay_detection() {
        let code = owned(&[
            "impl Scheduler for TokioScheduler {",
            "    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {",
            "        let join = tokio::spawn(async move {",
            "            tokio::time::sleep(delay).await;",
            "        });",
            "    }",
            "}",
        ]);
        assert!(is_sleep_call(&code[3]));
        assert!(is_scheduler_delay(&code, 3));
    }

    #[test]
    fn test_sleep_elsewhere_is_flagged() {
        let code = owned(&[
            "impl Shared {",
            "    async fn schedule_reconnect(self: &Arc<Self>) {",
            "        tokio::time::sleep(delay).await;",
            "    }",
            "}",
        ]);
        assert!(!is_scheduler_delay(&code, 2));
    }

    #[test]
    fn test_commented_sleep_ignored() {
        assert!(!is_sleep_call(code_part("    // tokio::time::sleep(d).await;")));
    }
}
