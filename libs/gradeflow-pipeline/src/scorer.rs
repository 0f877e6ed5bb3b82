// Scorer - Language-Agnostic Scoring Logic
//
// Core responsibility: turn raw execution reports into a verdict and a
// numeric score.
//
// Critical properties:
// - Knows nothing about HTTP or the execution service
// - Knows nothing about persistence
// - Pure function: (reports, test cases) -> (status, score)
//
// Scoring rules:
// - Each test case has a weight
// - score = (sum of weights of passing cases / total weight) * max_score
// - A compile error short-circuits every case to compilation_error, score 0
// - A runtime error or timeout fails that case only; remaining cases are
//   still evaluated
//
// Normalization: actual and expected output are compared exactly after
// trimming trailing whitespace. Case matters. Internal whitespace matters.

use gradeflow_common::types::{ExecutionStatus, TestCase, TestCaseResult};

use crate::client::ExecutionReport;

/// Fixed mapping from the execution service's status codes to a verdict
///
/// Ids 1-2 mean not-yet-finished; 7 through 12 are the signal/exit-code
/// family; anything unrecognized is treated as an internal error rather
/// than invented semantics.
pub fn map_status(status_id: u32) -> ExecutionStatus {
    match status_id {
        1 => ExecutionStatus::Pending,
        2 => ExecutionStatus::Running,
        3 => ExecutionStatus::Accepted,
        4 => ExecutionStatus::WrongAnswer,
        5 => ExecutionStatus::TimeLimitExceeded,
        6 => ExecutionStatus::CompilationError,
        7..=12 => ExecutionStatus::RuntimeError,
        _ => ExecutionStatus::InternalError,
    }
}

/// Single-run mode: derive a verdict from the service status alone.
/// No score is computed; this mode is for interactive feedback.
pub fn score_single(report: &ExecutionReport) -> ExecutionStatus {
    map_status(report.status_id)
}

/// Aggregated result of scoring one submission against its test cases
#[derive(Debug, Clone, PartialEq)]
pub struct Scorecard {
    pub status: ExecutionStatus,
    pub score: f64,
    pub max_score: f64,
    pub cases: Vec<TestCaseResult>,
}

/// Normalize output for comparison: exact match after trimming trailing
/// whitespace (newline style differences at the end do not matter)
fn normalize(output: &str) -> &str {
    output.trim_end()
}

/// Test-case mode: evaluate one report per test case and aggregate.
///
/// `reports` holds per-case raw outputs in test-case order. It may be
/// shorter than `test_cases` when execution stopped early on a compile
/// failure; missing cases are then covered by the short-circuit.
pub fn score_tests(
    reports: &[ExecutionReport],
    test_cases: &[TestCase],
    max_score: f64,
) -> Scorecard {
    // One compile failure condemns the whole attempt: the same source is
    // compiled for every case, so no case can pass.
    let compile_failed = reports
        .iter()
        .any(|r| map_status(r.status_id) == ExecutionStatus::CompilationError);
    if compile_failed {
        let cases = test_cases
            .iter()
            .map(|tc| TestCaseResult {
                test_case_id: tc.id,
                status: ExecutionStatus::CompilationError,
                passed: false,
                stdout: String::new(),
                stderr: String::new(),
                execution_time_ms: 0,
                weight: tc.weight,
            })
            .collect();
        return Scorecard {
            status: ExecutionStatus::CompilationError,
            score: 0.0,
            max_score,
            cases,
        };
    }

    let total_weight: u32 = test_cases.iter().map(|tc| tc.weight).sum();
    let mut passed_weight: u32 = 0;
    let mut cases = Vec::with_capacity(test_cases.len());

    for (idx, tc) in test_cases.iter().enumerate() {
        let result = match reports.get(idx) {
            Some(report) => evaluate_case(report, tc),
            // The runner produces one report per case; a hole here means
            // the item died mid-flight and the case was never run
            None => TestCaseResult {
                test_case_id: tc.id,
                status: ExecutionStatus::InternalError,
                passed: false,
                stdout: String::new(),
                stderr: "test case was not executed".to_string(),
                execution_time_ms: 0,
                weight: tc.weight,
            },
        };

        if result.passed {
            passed_weight += tc.weight;
        }
        cases.push(result);
    }

    let score = if total_weight == 0 {
        0.0
    } else {
        f64::from(passed_weight) / f64::from(total_weight) * max_score
    };

    // Accepted only when every case passed; otherwise the first failing
    // case decides the headline verdict
    let status = cases
        .iter()
        .find(|c| !c.passed)
        .map(|c| match c.status {
            ExecutionStatus::Accepted => ExecutionStatus::WrongAnswer,
            other => other,
        })
        .unwrap_or(ExecutionStatus::Accepted);

    Scorecard {
        status,
        score,
        max_score,
        cases,
    }
}

/// Evaluate a single test case against its raw report
///
/// Priority: service-reported failure first (runtime error, timeout),
/// output comparison only when the run itself succeeded.
fn evaluate_case(report: &ExecutionReport, test_case: &TestCase) -> TestCaseResult {
    let run_status = map_status(report.status_id);

    let (status, passed) = match run_status {
        ExecutionStatus::Accepted | ExecutionStatus::WrongAnswer => {
            let actual = normalize(&report.stdout);
            let expected = normalize(&test_case.expected_output);
            if actual == expected {
                (ExecutionStatus::Accepted, true)
            } else {
                (ExecutionStatus::WrongAnswer, false)
            }
        }
        other => (other, false),
    };

    TestCaseResult {
        test_case_id: test_case.id,
        status,
        passed,
        stdout: report.stdout.clone(),
        stderr: report.stderr.clone(),
        execution_time_ms: report.execution_time_ms,
        weight: test_case.weight,
    }
}
