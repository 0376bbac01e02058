use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::attempt::{Answer, AttemptStatus, ShuffleLayout};
use crate::schemas::exam::Exam;
use crate::schemas::result::ExamResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eligibility {
    pub can_take: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub has_active_attempt: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveAttempt {
    #[serde(default)]
    pub has_active_attempt: bool,
    #[serde(default)]
    pub response_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAttemptRequest {
    pub shuffle: ShuffleLayout,
}

/// Attempt state as returned by the start and resume endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptPayload {
    pub response_id: String,
    pub exam_id: String,
    #[serde(default)]
    pub student_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(default)]
    pub duration_seconds: Option<u64>,
    /// Present when the server hands back an unfinished attempt.
    #[serde(default, alias = "existingAnswers")]
    pub answers: Option<BTreeMap<String, Answer>>,
    #[serde(default)]
    pub flagged_indices: Vec<usize>,
    #[serde(default)]
    pub visited_indices: Vec<usize>,
    #[serde(default)]
    pub current_question_index: Option<usize>,
    #[serde(default)]
    pub elapsed_seconds: u64,
    #[serde(default)]
    pub shuffle: Option<ShuffleLayout>,
    #[serde(default)]
    pub shuffle_seed: Option<u64>,
    #[serde(default)]
    pub status: Option<AttemptStatus>,
    #[serde(default)]
    pub exam: Option<Exam>,
}

impl AttemptPayload {
    pub fn is_existing(&self) -> bool {
        self.answers.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveProgressRequest {
    pub response_id: String,
    pub exam_id: String,
    pub answers: BTreeMap<String, Answer>,
    pub flagged_indices: Vec<usize>,
    pub visited_indices: Vec<usize>,
    pub current_question_index: usize,
    pub elapsed_seconds: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveAck {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub saved_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub response_id: String,
    pub exam_id: String,
    /// Multiple-choice values are displayed indices; the server unshuffles them.
    pub answers: BTreeMap<String, Answer>,
    pub option_shuffle_map: BTreeMap<String, Vec<usize>>,
    pub question_order: Vec<usize>,
    pub flagged_indices: Vec<usize>,
    pub time_spent_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    #[serde(default)]
    pub graded: bool,
    #[serde(default, alias = "results")]
    pub result: Option<ExamResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSummary {
    pub response_id: String,
    #[serde(default)]
    pub attempt_number: u32,
    pub status: AttemptStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub submitted_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub total_score: Option<f64>,
    #[serde(default)]
    pub percentage: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_accepts_existing_answers_alias() {
        let payload: AttemptPayload = serde_json::from_value(json!({
            "responseId": "R1",
            "examId": "E1",
            "studentId": "S1",
            "startedAt": "2025-03-01T10:00:00Z",
            "durationSeconds": 600,
            "existingAnswers": { "Q1": 2, "Q2": "photosynthesis" },
            "elapsedSeconds": 120
        }))
        .expect("payload");

        assert!(payload.is_existing());
        let answers = payload.answers.expect("answers");
        assert_eq!(answers["Q1"], Answer::Choice(2));
        assert_eq!(answers["Q2"], Answer::Text("photosynthesis".to_string()));
        assert_eq!(payload.elapsed_seconds, 120);
    }

    #[test]
    fn fresh_payload_is_not_existing() {
        let payload: AttemptPayload = serde_json::from_value(json!({
            "responseId": "R1",
            "examId": "E1",
            "startedAt": "2025-03-01T10:00:00Z"
        }))
        .expect("payload");

        assert!(!payload.is_existing());
        assert_eq!(payload.duration_seconds, None);
        assert!(payload.flagged_indices.is_empty());
    }

    #[test]
    fn submit_response_accepts_results_alias() {
        let response: SubmitResponse = serde_json::from_value(json!({
            "graded": true,
            "results": { "totalScore": 8, "maxScore": 10, "percentage": 80, "passed": true }
        }))
        .expect("submit response");

        let result = response.result.expect("result");
        assert!(result.passed);
        assert_eq!(result.total_score, 8.0);
    }
}
