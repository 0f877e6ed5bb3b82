// Persistence port for submissions, questions and outcomes
//
// The entity store lives outside this pipeline (an ORM-backed database in
// the full system). The pipeline only needs the four operations below, so
// they form a trait seam; the in-memory implementation backs tests and
// standalone deployments. Rows are written independently per submission -
// no cross-row transaction is needed across batch items.

use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use gradeflow_common::types::{
    ExecutionOutcome, Question, Submission, SubmissionStatus,
};

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// All submissions for an exam still waiting to be graded
    async fn pending_submissions(&self, exam_id: Uuid) -> Result<Vec<Submission>>;

    /// The question a submission answers, with its test cases
    async fn question(&self, question_id: Uuid) -> Result<Option<Question>>;

    async fn set_submission_status(
        &self,
        submission_id: Uuid,
        status: SubmissionStatus,
    ) -> Result<()>;

    /// Persist the graded result of one attempt (append-only)
    async fn record_outcome(&self, outcome: ExecutionOutcome) -> Result<()>;

    async fn outcome(&self, submission_id: Uuid) -> Result<Option<ExecutionOutcome>>;
}

/// In-memory store keyed by ids
#[derive(Default)]
pub struct InMemoryStore {
    submissions: RwLock<HashMap<Uuid, Submission>>,
    questions: RwLock<HashMap<Uuid, Question>>,
    outcomes: RwLock<HashMap<Uuid, ExecutionOutcome>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_submission(&self, submission: Submission) {
        self.submissions
            .write()
            .await
            .insert(submission.id, submission);
    }

    pub async fn insert_question(&self, question: Question) {
        self.questions.write().await.insert(question.id, question);
    }
}

#[async_trait]
impl SubmissionStore for InMemoryStore {
    async fn pending_submissions(&self, exam_id: Uuid) -> Result<Vec<Submission>> {
        let submissions = self.submissions.read().await;
        Ok(submissions
            .values()
            .filter(|s| s.exam_id == exam_id && s.status == SubmissionStatus::Pending)
            .cloned()
            .collect())
    }

    async fn question(&self, question_id: Uuid) -> Result<Option<Question>> {
        let questions = self.questions.read().await;
        Ok(questions.get(&question_id).cloned())
    }

    async fn set_submission_status(
        &self,
        submission_id: Uuid,
        status: SubmissionStatus,
    ) -> Result<()> {
        let mut submissions = self.submissions.write().await;
        match submissions.get_mut(&submission_id) {
            Some(submission) => {
                submission.status = status;
                Ok(())
            }
            None => bail!("submission {} not found", submission_id),
        }
    }

    async fn record_outcome(&self, outcome: ExecutionOutcome) -> Result<()> {
        let mut outcomes = self.outcomes.write().await;
        outcomes.insert(outcome.submission_id, outcome);
        Ok(())
    }

    async fn outcome(&self, submission_id: Uuid) -> Result<Option<ExecutionOutcome>> {
        let outcomes = self.outcomes.read().await;
        Ok(outcomes.get(&submission_id).cloned())
    }
}
