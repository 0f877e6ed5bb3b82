use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Strongly-typed language enum
/// The set matches what the execution service has runtimes for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Java,
    Cpp,
    C,
    Javascript,
}

impl Language {
    /// Returns all language variants
    /// This is the single source of truth for available languages
    pub fn all_variants() -> &'static [Language] {
        &[
            Language::Python,
            Language::Java,
            Language::Cpp,
            Language::C,
            Language::Javascript,
        ]
    }

    /// Parse a language from string (case-insensitive)
    /// "python3" is accepted as an alias for python since real clients send it
    pub fn from_str(s: &str) -> Option<Language> {
        match s.to_lowercase().as_str() {
            "python" | "python3" => Some(Language::Python),
            "java" => Some(Language::Java),
            "cpp" => Some(Language::Cpp),
            "c" => Some(Language::C),
            "javascript" => Some(Language::Javascript),
            _ => None,
        }
    }

    /// Runtime identifier used by the execution service
    pub fn runtime_id(&self) -> u32 {
        match self {
            Language::Python => 71,
            Language::Java => 62,
            Language::Cpp => 54,
            Language::C => 50,
            Language::Javascript => 63,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Python => write!(f, "python"),
            Language::Java => write!(f, "java"),
            Language::Cpp => write!(f, "cpp"),
            Language::C => write!(f, "c"),
            Language::Javascript => write!(f, "javascript"),
        }
    }
}

/// Test Case Definition (Immutable Input)
/// Test cases are immutable - the pipeline must not mutate them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: u32,
    pub input: String,
    pub expected_output: String,
    pub weight: u32, // for scoring
}

/// A question's grading material as the store hands it out
/// An empty test case list means the run is ungraded feedback only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub test_cases: Vec<TestCase>,
    pub max_score: f64,
}

/// Submission lifecycle states
/// Mutated only by the grading pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Running,
    Completed,
    Error,
}

/// One attempt by a student to solve a question, as raw source code
///
/// Source code is write-once: a re-submission creates a new row with an
/// incremented attempt number. The language is kept as the raw string the
/// student sent; it is validated when the pipeline picks the row up, so an
/// unknown language surfaces as that item's error rather than a lost row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub student_id: Uuid,
    pub exam_id: Uuid,
    pub question_id: Uuid,
    pub source_code: String,
    pub language: String,
    pub attempt: u32,
    pub status: SubmissionStatus,
}

/// Execution verdict for a graded attempt or a single test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    CompilationError,
    RuntimeError,
    InternalError,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Accepted => "accepted",
            ExecutionStatus::WrongAnswer => "wrong_answer",
            ExecutionStatus::TimeLimitExceeded => "time_limit_exceeded",
            ExecutionStatus::CompilationError => "compilation_error",
            ExecutionStatus::RuntimeError => "runtime_error",
            ExecutionStatus::InternalError => "internal_error",
        }
    }

    /// Terminal statuses can never transition again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-Test Result
/// Captures individual test case execution outcome
/// Enables partial success and detailed feedback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub test_case_id: u32,
    pub status: ExecutionStatus,
    pub passed: bool,
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u64,
    pub weight: u32,
}

/// The graded result of running a Submission once
///
/// Append-only: produced exactly once per graded attempt unless re-graded.
/// `error` carries the pipeline-level failure message when the item could
/// not be executed at all (status is then internal_error).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub submission_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    pub compile_output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub execution_time_ms: u64,
    pub memory_kb: u64,
    pub score: f64,
    pub max_score: f64,
    pub test_case_results: Vec<TestCaseResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Batch job lifecycle
/// Transitions are monotonic: running -> completed | failed, never backward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Running,
    Completed,
    Failed,
}

/// Progress entry for one submission within a batch job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub submission_id: Uuid,
    pub status: ExecutionStatus,
    pub score: f64,
    pub max_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A tracked group of submissions being graded together
///
/// Owned exclusively by the job registry until explicitly deleted by the
/// caller; a process restart loses it. The submission and outcome rows
/// written as each item completes are the system of record, not this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub total: usize,
    pub completed: usize,
    pub state: JobState,
    pub items: Vec<BatchItem>,
    pub created_at: DateTime<Utc>,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
