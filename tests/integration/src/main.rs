//! Integration Test Harness
//!
//! Runs every integration suite and prints a summary.
//!
//! # Usage
//!
//! Run all suites:
//! ```text
//! cargo run -p integration-tests
//! ```
//!
//! Run one suite:
//! ```text
//! cargo test -p integration-tests --test invocation_tests
//! cargo test -p integration-tests --test failover_tests
//! cargo test -p integration-tests --test fragmentation_tests
//! cargo test -p integration-tests --test stress_tests
//! ```
//!
//! Run with increased logging:
//! ```text
//! RUST_LOG=orb_transport=debug cargo run -p integration-tests
//! ```

mod common;

use common::TestSuiteResults;
use std::process::Command;
use std::time::Instant;

struct TestCategory {
    name: &'static str,
    description: &'static str,
    test_name: &'static str,
}

const TEST_CATEGORIES: &[TestCategory] = &[
    TestCategory {
        name: "Invocation Tests",
        description: "Request/reply, exceptions, oneway, timeouts, interceptors",
        test_name: "invocation_tests",
    },
    TestCategory {
        name: "Failover Tests",
        description: "Alternate endpoints, sticky failover, forwards, addressing modes",
        test_name: "failover_tests",
    },
    TestCategory {
        name: "Fragmentation Tests",
        description: "Messages many times the fragment size",
        test_name: "fragmentation_tests",
    },
    TestCategory {
        name: "Stress Tests",
        description: "Concurrent invocations, reclaim, connection churn",
        test_name: "stress_tests",
    },
];

fn print_test_categories() {
    println!("Test Categories:");
    println!("{}", "-".repeat(80));
    for (i, cat) in TEST_CATEGORIES.iter().enumerate() {
        println!("  {}. {} - {}", i + 1, cat.name, cat.description);
    }
    println!("{}", "-".repeat(80));
    println!();
}

fn run_test_category(category: &TestCategory) -> TestSuiteResults {
    println!("\n{}", "=".repeat(80));
    println!("Running: {}", category.name);
    println!("{}", "=".repeat(80));

    let start = Instant::now();
    let output = Command::new("cargo")
        .args(["test", "-p", "integration-tests", "--test", category.test_name, "--", "--nocapture"])
        .output();
    let duration = start.elapsed();

    let (passed, summary) = match output {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stdout.is_empty() {
                println!("{}", stdout);
            }
            if !stderr.is_empty() {
                eprintln!("{}", stderr);
            }
            if output.status.success() {
                (true, "PASSED".to_string())
            } else {
                (false, format!("FAILED (exit code: {:?})", output.status.code()))
            }
        }
        Err(e) => (false, format!("Failed to execute: {}", e)),
    };

    TestSuiteResults {
        name: category.name,
        passed,
        duration,
        summary,
    }
}

fn main() {
    println!("{}", "=".repeat(80));
    println!("ORB transport integration suite");
    println!("{}", "=".repeat(80));
    print_test_categories();

    let total_start = Instant::now();
    let results: Vec<TestSuiteResults> = TEST_CATEGORIES.iter().map(run_test_category).collect();
    let total_duration = total_start.elapsed();

    println!("\n{}", "=".repeat(80));
    println!("FINAL SUMMARY");
    println!("{}", "=".repeat(80));

    let passed = results.iter().filter(|r| r.passed).count();
    let failed = results.len() - passed;
    println!("\nCategories: {} | Passed: {} | Failed: {}", results.len(), passed, failed);
    println!("Total Duration: {:?}", total_duration);
    println!();

    println!("{:<30} {:<10} {:<15} {}", "Category", "Status", "Duration", "Details");
    println!("{}", "-".repeat(80));
    for r in &results {
        let status = if r.passed { "PASS" } else { "FAIL" };
        println!("{:<30} {:<10} {:<15?} {}", r.name, status, r.duration, r.summary);
    }
    println!("{}", "=".repeat(80));

    if failed > 0 {
        println!("\nSome suites failed!");
        std::process::exit(1);
    }
    println!("\nAll suites passed!");
}
