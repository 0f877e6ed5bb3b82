// Batch Job Runner - High-Level Orchestration
//
// Coordinates the execution client, the scorer and the store to grade a
// whole exam's worth of submissions, publishing progress to the job
// registry as each item lands.
//
// The runner is detached from the request that triggered it: submit_batch
// registers the job, spawns the driver and returns the job id at once.
// Work items fan out with bounded parallelism - a fixed-size worker pool
// drawn from a semaphore, never one task per item unbounded - so the
// execution service is not overwhelmed.
//
// One item's failure is recorded as that item's outcome and never aborts
// the batch; every other item is still attempted. Only a failure of the
// runner's own bookkeeping (a panicked worker) fails the whole job.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use gradeflow_common::types::{
    BatchItem, ExecutionOutcome, ExecutionStatus, Submission, SubmissionStatus, TestCaseResult,
};

use crate::client::{CodeExecutor, ExecutionReport};
use crate::registry::JobRegistry;
use crate::scorer;
use crate::store::SubmissionStore;

#[derive(Clone)]
struct BatchContext {
    executor: Arc<dyn CodeExecutor>,
    store: Arc<dyn SubmissionStore>,
    registry: Arc<JobRegistry>,
    item_deadline: Duration,
}

pub struct BatchRunner {
    ctx: BatchContext,
    worker_count: usize,
}

impl BatchRunner {
    pub fn new(
        executor: Arc<dyn CodeExecutor>,
        store: Arc<dyn SubmissionStore>,
        registry: Arc<JobRegistry>,
        worker_count: usize,
        item_deadline: Duration,
    ) -> Self {
        Self {
            ctx: BatchContext {
                executor,
                store,
                registry,
                item_deadline,
            },
            worker_count: worker_count.max(1),
        }
    }

    /// Register a job for the given submissions and return its id
    /// immediately; grading happens on a detached task. An empty batch
    /// still yields a job, already completed.
    pub fn submit_batch(&self, exam_id: Uuid, submissions: Vec<Submission>) -> Uuid {
        let job_id = self.ctx.registry.create(exam_id, submissions.len());
        if submissions.is_empty() {
            return job_id;
        }

        let ctx = self.ctx.clone();
        let worker_count = self.worker_count;
        tokio::spawn(async move {
            run_batch(ctx, job_id, submissions, worker_count).await;
        });

        job_id
    }
}

async fn run_batch(
    ctx: BatchContext,
    job_id: Uuid,
    submissions: Vec<Submission>,
    worker_count: usize,
) {
    let total = submissions.len();
    info!(job_id = %job_id, total, workers = worker_count, "batch grading started");

    let semaphore = Arc::new(Semaphore::new(worker_count));
    let mut workers = JoinSet::new();
    let mut dispatched = 0usize;

    for submission in submissions {
        // Cancellation is advisory: items already running finish, this
        // one and everything after it are simply not dispatched
        if ctx.registry.is_cancelled(&job_id) {
            break;
        }

        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                ctx.registry
                    .mark_failed(&job_id, "worker pool closed unexpectedly");
                return;
            }
        };

        // The cancel may have landed while we waited for a free worker
        if ctx.registry.is_cancelled(&job_id) {
            drop(permit);
            break;
        }

        dispatched += 1;
        let ctx = ctx.clone();
        workers.spawn(async move {
            let _permit = permit;
            let item = grade_one(&ctx, submission).await;
            ctx.registry.record_item(&job_id, item);
        });
    }

    let mut worker_panicked = false;
    while let Some(joined) = workers.join_next().await {
        if let Err(join_err) = joined {
            error!(job_id = %job_id, error = %join_err, "grading worker died");
            worker_panicked = true;
        }
    }

    if worker_panicked {
        ctx.registry.mark_failed(&job_id, "a grading worker panicked");
    } else if ctx.registry.is_cancelled(&job_id) {
        ctx.registry
            .mark_failed(&job_id, "cancelled before all submissions were dispatched");
    }

    info!(
        job_id = %job_id,
        dispatched,
        skipped = total - dispatched,
        "batch grading finished"
    );
}

/// Grade one submission, converting every failure into that item's
/// outcome so nothing unwinds past the worker.
async fn grade_one(ctx: &BatchContext, submission: Submission) -> BatchItem {
    let submission_id = submission.id;
    match grade_inner(ctx, &submission).await {
        Ok(item) => item,
        Err(err) => {
            warn!(
                submission_id = %submission_id,
                student_id = %submission.student_id,
                error = %err,
                "submission could not be graded"
            );

            let outcome = error_outcome(submission_id, &err);
            if let Err(store_err) = ctx.store.record_outcome(outcome).await {
                error!(submission_id = %submission_id, error = %store_err, "failed to persist error outcome");
            }
            if let Err(store_err) = ctx
                .store
                .set_submission_status(submission_id, SubmissionStatus::Error)
                .await
            {
                error!(submission_id = %submission_id, error = %store_err, "failed to mark submission errored");
            }

            BatchItem {
                submission_id,
                status: ExecutionStatus::InternalError,
                score: 0.0,
                max_score: 0.0,
                error: Some(err.to_string()),
            }
        }
    }
}

async fn grade_inner(ctx: &BatchContext, submission: &Submission) -> Result<BatchItem> {
    ctx.store
        .set_submission_status(submission.id, SubmissionStatus::Running)
        .await
        .context("failed to mark submission running")?;

    let question = ctx
        .store
        .question(submission.question_id)
        .await
        .context("failed to load question")?
        .ok_or_else(|| anyhow!("question {} not found", submission.question_id))?;

    let outcome = if question.test_cases.is_empty() {
        // Ungraded run: a single execution for feedback, no score
        let report = ctx
            .executor
            .execute_polling(
                &submission.source_code,
                &submission.language,
                "",
                ctx.item_deadline,
            )
            .await?;
        let status = scorer::score_single(&report);
        build_outcome(
            submission.id,
            Some(&report),
            status,
            0.0,
            question.max_score,
            vec![],
            report.execution_time_ms,
            report.memory_kb,
        )
    } else {
        // One execution per test case, sequential within the item. A
        // compile failure on any case means no later case can pass, so
        // execution stops there and the scorer short-circuits the rest.
        let mut reports: Vec<ExecutionReport> = Vec::with_capacity(question.test_cases.len());
        for test_case in &question.test_cases {
            let report = ctx
                .executor
                .execute_polling(
                    &submission.source_code,
                    &submission.language,
                    &test_case.input,
                    ctx.item_deadline,
                )
                .await?;
            let compile_failed =
                scorer::map_status(report.status_id) == ExecutionStatus::CompilationError;
            reports.push(report);
            if compile_failed {
                break;
            }
        }

        let card = scorer::score_tests(&reports, &question.test_cases, question.max_score);
        let total_time_ms: u64 = reports.iter().map(|r| r.execution_time_ms).sum();
        let peak_memory_kb = reports.iter().map(|r| r.memory_kb).max().unwrap_or(0);
        build_outcome(
            submission.id,
            reports.last(),
            card.status,
            card.score,
            card.max_score,
            card.cases,
            total_time_ms,
            peak_memory_kb,
        )
    };

    let status = outcome.status;
    let score = outcome.score;
    let max_score = outcome.max_score;

    ctx.store
        .record_outcome(outcome)
        .await
        .context("failed to persist outcome")?;
    ctx.store
        .set_submission_status(submission.id, SubmissionStatus::Completed)
        .await
        .context("failed to mark submission completed")?;

    info!(
        submission_id = %submission.id,
        status = %status,
        score,
        max_score,
        "submission graded"
    );

    Ok(BatchItem {
        submission_id: submission.id,
        status,
        score,
        max_score,
        error: None,
    })
}

#[allow(clippy::too_many_arguments)]
fn build_outcome(
    submission_id: Uuid,
    last_report: Option<&ExecutionReport>,
    status: ExecutionStatus,
    score: f64,
    max_score: f64,
    test_case_results: Vec<TestCaseResult>,
    execution_time_ms: u64,
    memory_kb: u64,
) -> ExecutionOutcome {
    ExecutionOutcome {
        submission_id,
        token: last_report.and_then(|r| r.token.clone()),
        status,
        stdout: last_report.map(|r| r.stdout.clone()).unwrap_or_default(),
        stderr: last_report.map(|r| r.stderr.clone()).unwrap_or_default(),
        compile_output: last_report
            .map(|r| r.compile_output.clone())
            .unwrap_or_default(),
        exit_code: last_report.and_then(|r| r.exit_code),
        execution_time_ms,
        memory_kb,
        score,
        max_score,
        test_case_results,
        error: None,
    }
}

fn error_outcome(submission_id: Uuid, err: &anyhow::Error) -> ExecutionOutcome {
    ExecutionOutcome {
        submission_id,
        token: None,
        status: ExecutionStatus::InternalError,
        stdout: String::new(),
        stderr: String::new(),
        compile_output: String::new(),
        exit_code: None,
        execution_time_ms: 0,
        memory_kb: 0,
        score: 0.0,
        max_score: 0.0,
        test_case_results: vec![],
        error: Some(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use gradeflow_common::error::ExecutionError;
    use gradeflow_common::types::{JobState, Language, Question, TestCase};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fake sandbox: behavior is driven by markers in the source code so
    /// tests need no HTTP. Tracks in-flight executions to verify the
    /// worker pool bound.
    struct FakeExecutor {
        delay: Duration,
        executions: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl FakeExecutor {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                executions: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }
        }

        async fn run(&self, source_code: &str, language: &str) -> Result<ExecutionReport, ExecutionError> {
            if Language::from_str(language).is_none() {
                return Err(ExecutionError::UnsupportedLanguage(language.to_string()));
            }

            self.executions.fetch_add(1, Ordering::SeqCst);
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now_active, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if source_code.contains("boom") {
                return Err(ExecutionError::ServiceUnavailable("connection refused".to_string()));
            }
            if source_code.contains("syntax error") {
                return Ok(ExecutionReport {
                    status_id: 6,
                    compile_output: "expected ';'".to_string(),
                    ..Default::default()
                });
            }
            Ok(ExecutionReport {
                status_id: 3,
                stdout: "ok\n".to_string(),
                execution_time_ms: 5,
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl CodeExecutor for FakeExecutor {
        async fn execute(
            &self,
            source_code: &str,
            language: &str,
            _stdin: &str,
        ) -> Result<ExecutionReport, ExecutionError> {
            self.run(source_code, language).await
        }

        async fn execute_polling(
            &self,
            source_code: &str,
            language: &str,
            _stdin: &str,
            _deadline: Duration,
        ) -> Result<ExecutionReport, ExecutionError> {
            self.run(source_code, language).await
        }
    }

    struct Harness {
        runner: BatchRunner,
        store: Arc<InMemoryStore>,
        registry: Arc<JobRegistry>,
        executor: Arc<FakeExecutor>,
    }

    fn harness(worker_count: usize, delay: Duration) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(JobRegistry::new());
        let executor = Arc::new(FakeExecutor::new(delay));
        let runner = BatchRunner::new(
            Arc::clone(&executor) as Arc<dyn CodeExecutor>,
            Arc::clone(&store) as Arc<dyn SubmissionStore>,
            Arc::clone(&registry),
            worker_count,
            Duration::from_secs(5),
        );
        Harness {
            runner,
            store,
            registry,
            executor,
        }
    }

    async fn seed_submission(
        harness: &Harness,
        exam_id: Uuid,
        source_code: &str,
        language: &str,
        test_cases: Vec<TestCase>,
        max_score: f64,
    ) -> Submission {
        let question = Question {
            id: Uuid::new_v4(),
            test_cases,
            max_score,
        };
        harness.store.insert_question(question.clone()).await;

        let submission = Submission {
            id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            exam_id,
            question_id: question.id,
            source_code: source_code.to_string(),
            language: language.to_string(),
            attempt: 1,
            status: SubmissionStatus::Pending,
        };
        harness.store.insert_submission(submission.clone()).await;
        submission
    }

    fn passing_case(id: u32, weight: u32) -> TestCase {
        TestCase {
            id,
            input: String::new(),
            expected_output: "ok\n".to_string(),
            weight,
        }
    }

    async fn wait_for_terminal(registry: &JobRegistry, job_id: &Uuid) -> gradeflow_common::types::BatchJob {
        for _ in 0..500 {
            if let Some(snapshot) = registry.snapshot(job_id) {
                if snapshot.state != JobState::Running {
                    return snapshot;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never reached a terminal state");
    }

    #[tokio::test]
    async fn test_empty_batch_completes_immediately() {
        let h = harness(4, Duration::from_millis(1));
        let job_id = h.runner.submit_batch(Uuid::new_v4(), vec![]);

        let snapshot = h.registry.snapshot(&job_id).unwrap();
        assert_eq!(snapshot.state, JobState::Completed);
        assert_eq!(snapshot.total, 0);
        assert_eq!(snapshot.completed, 0);
    }

    #[tokio::test]
    async fn test_batch_grades_all_submissions() {
        let h = harness(4, Duration::from_millis(1));
        let exam_id = Uuid::new_v4();

        let mut ids = Vec::new();
        for _ in 0..3 {
            let s = seed_submission(&h, exam_id, "print('ok')", "python", vec![passing_case(1, 10)], 10.0).await;
            ids.push(s.id);
        }

        let submissions = h.store.pending_submissions(exam_id).await.unwrap();
        let job_id = h.runner.submit_batch(exam_id, submissions);

        let snapshot = wait_for_terminal(&h.registry, &job_id).await;
        assert_eq!(snapshot.state, JobState::Completed);
        assert_eq!(snapshot.completed, 3);
        assert!(snapshot
            .items
            .iter()
            .all(|i| i.status == ExecutionStatus::Accepted && i.score == 10.0));

        for id in ids {
            let outcome = h.store.outcome(id).await.unwrap().unwrap();
            assert_eq!(outcome.status, ExecutionStatus::Accepted);
            assert_eq!(outcome.score, 10.0);
        }
        // nothing left pending
        assert!(h.store.pending_submissions(exam_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_item_failures_do_not_abort_batch() {
        let h = harness(4, Duration::from_millis(1));
        let exam_id = Uuid::new_v4();

        let mut failing = Vec::new();
        for i in 0..5 {
            let source = if i < 2 { "boom" } else { "print('ok')" };
            let s = seed_submission(&h, exam_id, source, "python", vec![passing_case(1, 10)], 10.0).await;
            if i < 2 {
                failing.push(s.id);
            }
        }

        let submissions = h.store.pending_submissions(exam_id).await.unwrap();
        let job_id = h.runner.submit_batch(exam_id, submissions);

        let snapshot = wait_for_terminal(&h.registry, &job_id).await;
        // every item was attempted, the job itself did not fail
        assert_eq!(snapshot.state, JobState::Completed);
        assert_eq!(snapshot.completed, 5);

        let errored: Vec<_> = snapshot
            .items
            .iter()
            .filter(|i| i.status == ExecutionStatus::InternalError)
            .collect();
        assert_eq!(errored.len(), 2);
        assert!(errored.iter().all(|i| i.error.is_some()));

        for id in failing {
            let outcome = h.store.outcome(id).await.unwrap().unwrap();
            assert_eq!(outcome.status, ExecutionStatus::InternalError);
            assert!(outcome.error.as_deref().unwrap_or("").contains("unavailable"));
        }
    }

    #[tokio::test]
    async fn test_unknown_language_is_that_items_error() {
        let h = harness(2, Duration::from_millis(1));
        let exam_id = Uuid::new_v4();

        seed_submission(&h, exam_id, "whatever", "cobol", vec![passing_case(1, 10)], 10.0).await;
        seed_submission(&h, exam_id, "print('ok')", "python", vec![passing_case(1, 10)], 10.0).await;

        let submissions = h.store.pending_submissions(exam_id).await.unwrap();
        let job_id = h.runner.submit_batch(exam_id, submissions);

        let snapshot = wait_for_terminal(&h.registry, &job_id).await;
        assert_eq!(snapshot.state, JobState::Completed);
        assert_eq!(snapshot.completed, 2);

        let errors: Vec<_> = snapshot.items.iter().filter(|i| i.error.is_some()).collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].error.as_deref().unwrap().contains("cobol"));
    }

    #[tokio::test]
    async fn test_compile_failure_stops_remaining_cases() {
        let h = harness(1, Duration::from_millis(1));
        let exam_id = Uuid::new_v4();

        let cases = vec![passing_case(1, 10), passing_case(2, 10), passing_case(3, 10)];
        let s = seed_submission(&h, exam_id, "int main( { syntax error", "cpp", cases, 30.0).await;

        let submissions = h.store.pending_submissions(exam_id).await.unwrap();
        let job_id = h.runner.submit_batch(exam_id, submissions);

        let snapshot = wait_for_terminal(&h.registry, &job_id).await;
        assert_eq!(snapshot.state, JobState::Completed);

        // only the first case was ever sent to the sandbox
        assert_eq!(h.executor.executions.load(Ordering::SeqCst), 1);

        let outcome = h.store.outcome(s.id).await.unwrap().unwrap();
        assert_eq!(outcome.status, ExecutionStatus::CompilationError);
        assert_eq!(outcome.score, 0.0);
        assert_eq!(outcome.test_case_results.len(), 3);
        assert!(outcome
            .test_case_results
            .iter()
            .all(|c| c.status == ExecutionStatus::CompilationError));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_worker_pool_bound_is_respected() {
        let h = harness(2, Duration::from_millis(40));
        let exam_id = Uuid::new_v4();

        for _ in 0..6 {
            seed_submission(&h, exam_id, "print('ok')", "python", vec![passing_case(1, 10)], 10.0).await;
        }

        let submissions = h.store.pending_submissions(exam_id).await.unwrap();
        let job_id = h.runner.submit_batch(exam_id, submissions);

        let snapshot = wait_for_terminal(&h.registry, &job_id).await;
        assert_eq!(snapshot.completed, 6);
        assert!(
            h.executor.max_active.load(Ordering::SeqCst) <= 2,
            "worker pool bound exceeded: {}",
            h.executor.max_active.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn test_cancellation_skips_pending_items() {
        let h = harness(1, Duration::from_millis(100));
        let exam_id = Uuid::new_v4();

        for _ in 0..4 {
            seed_submission(&h, exam_id, "print('ok')", "python", vec![passing_case(1, 10)], 10.0).await;
        }

        let submissions = h.store.pending_submissions(exam_id).await.unwrap();
        let job_id = h.runner.submit_batch(exam_id, submissions);

        // let the first item get in flight, then cancel
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.registry.cancel(&job_id));

        let snapshot = wait_for_terminal(&h.registry, &job_id).await;
        assert_eq!(snapshot.state, JobState::Failed);
        assert!(snapshot.completed < snapshot.total, "expected a partial count");
        assert!(snapshot.error.is_some());
    }

    #[tokio::test]
    async fn test_ungraded_run_has_no_score() {
        let h = harness(1, Duration::from_millis(1));
        let exam_id = Uuid::new_v4();

        let s = seed_submission(&h, exam_id, "print('ok')", "python", vec![], 0.0).await;

        let submissions = h.store.pending_submissions(exam_id).await.unwrap();
        let job_id = h.runner.submit_batch(exam_id, submissions);

        let snapshot = wait_for_terminal(&h.registry, &job_id).await;
        assert_eq!(snapshot.state, JobState::Completed);

        let outcome = h.store.outcome(s.id).await.unwrap().unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Accepted);
        assert_eq!(outcome.score, 0.0);
        assert!(outcome.test_case_results.is_empty());
    }
}
