//! Integration Test: Blocking Call Prohibition
//!
//! **Policy**: Production code in the chatsync crates MUST NOT block a runtime
//! thread or step outside the single engine task.
//! - Waiting is done with tokio timers (`sleep_until` on the next deadline)
//! - Concurrency is tokio tasks, not OS threads
//! - No nested runtimes via `block_on`

use architectural_enforcement::{find_violations, Violation};

fn report(kind: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ CRITICAL: {kind} found in production code!\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }

    panic!(
        "\nFound {} {kind} violation(s) in production code.\nFix these before merging!",
        violations.len()
    );
}

/// Test that production code does not call thread sleep
#[test]
fn test_no_thread_sleep_in_production_code() {
    let violations = find_violations(&["thread::sleep(", "std::thread::sleep"]);
    report("Thread sleep calls", &violations);
}

/// Test that production code does not spawn OS threads
#[test]
fn test_no_thread_spawn_in_production_code() {
    let violations = find_violations(&["thread::spawn(", "thread::Builder"]);
    report("OS thread spawns", &violations);
}

/// Test that production code does not nest runtimes
#[test]
fn test_no_block_on_in_production_code() {
    let violations = find_violations(&["block_on(", "Runtime::new("]);
    report("Blocking runtime entries", &violations);
}
