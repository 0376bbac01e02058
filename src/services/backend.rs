use async_trait::async_trait;

use crate::errors::BackendError;
use crate::schemas::attempt::{
    ActiveAttempt, AttemptPayload, AttemptSummary, Eligibility, SaveAck, SaveProgressRequest,
    StartAttemptRequest, SubmitRequest, SubmitResponse,
};
use crate::schemas::exam::Exam;
use crate::schemas::result::ExamResult;

/// The exam service as the attempt engine needs it. Submit is assumed idempotent on
/// `response_id` server-side, so retrying it is safe.
#[async_trait]
pub trait ExamBackend: Send + Sync {
    async fn fetch_exam(&self, exam_id: &str) -> Result<Exam, BackendError>;

    async fn check_eligibility(&self, exam_id: &str) -> Result<Eligibility, BackendError>;

    async fn active_attempt(&self, exam_id: &str) -> Result<ActiveAttempt, BackendError>;

    async fn start_attempt(
        &self,
        exam_id: &str,
        request: &StartAttemptRequest,
    ) -> Result<AttemptPayload, BackendError>;

    async fn resume_attempt(&self, exam_id: &str) -> Result<AttemptPayload, BackendError>;

    async fn save_progress(&self, request: &SaveProgressRequest) -> Result<SaveAck, BackendError>;

    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse, BackendError>;

    async fn attempt_history(&self, exam_id: &str) -> Result<Vec<AttemptSummary>, BackendError>;

    async fn fetch_results(&self, response_id: &str) -> Result<ExamResult, BackendError>;

    async fn fetch_detailed_results(&self, response_id: &str) -> Result<ExamResult, BackendError>;
}
