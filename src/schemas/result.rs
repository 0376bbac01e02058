use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResult {
    pub question_id: String,
    #[serde(default)]
    pub student_answer: Option<String>,
    #[serde(default)]
    pub correct_answer: Option<String>,
    #[serde(default, alias = "points")]
    pub earned_points: f64,
    #[serde(default)]
    pub max_points: f64,
    /// `None` for answers that need manual grading.
    #[serde(default)]
    pub is_correct: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamResult {
    #[serde(default)]
    pub total_score: f64,
    #[serde(default)]
    pub max_score: f64,
    #[serde(default)]
    pub percentage: f64,
    #[serde(default)]
    pub passed: bool,
    #[serde(default, alias = "timeSpent")]
    pub time_spent_seconds: u64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub submitted_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub question_results: Vec<QuestionResult>,
    /// Per-question earned points when the server sends no breakdown.
    #[serde(default)]
    pub question_scores: BTreeMap<String, f64>,
}

impl ExamResult {
    pub fn has_breakdown(&self) -> bool {
        !self.question_results.is_empty()
    }
}
