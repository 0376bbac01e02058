use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionType {
    MultipleChoice,
    TrueFalse,
    #[serde(alias = "text")]
    ShortAnswer,
    Essay,
}

impl QuestionType {
    pub fn takes_choice(self) -> bool {
        matches!(self, QuestionType::MultipleChoice)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[validate(length(min = 1, message = "question id must not be empty"))]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    #[serde(default)]
    pub question: String,
    #[validate(range(exclusive_min = 0.0, message = "points must be positive"))]
    pub points: f64,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub correct_answer_index: Option<usize>,
    #[serde(default)]
    pub correct_answer: Option<String>,
    #[serde(default)]
    pub acceptable_answers: Vec<String>,
    #[serde(default)]
    pub max_length: Option<usize>,
}

impl Question {
    pub fn option_count(&self) -> usize {
        self.options.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Exam {
    #[validate(length(min = 1, message = "exam id must not be empty"))]
    pub id: String,
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub title: String,
    /// Zero means the exam is untimed.
    #[serde(default, alias = "duration")]
    pub duration_minutes: u32,
    #[serde(default)]
    pub total_points: f64,
    #[serde(default)]
    #[validate(range(min = 0.0, max = 100.0, message = "pass_percentage must be within 0..=100"))]
    pub pass_percentage: f64,
    #[serde(default)]
    #[validate(nested)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub shuffle_questions: bool,
    #[serde(default)]
    pub shuffle_options: bool,
    #[serde(default)]
    pub allow_navigation: bool,
    #[serde(default = "default_show_timer")]
    pub show_timer: bool,
    #[serde(default)]
    pub auto_submit: bool,
    #[serde(default)]
    pub show_results: bool,
    #[serde(default)]
    pub require_safe_browser: bool,
}

impl Exam {
    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|question| question.id == question_id)
    }

    pub fn duration_seconds(&self) -> u64 {
        u64::from(self.duration_minutes) * 60
    }

    /// Field validation plus the cross-field rules the attempt engine relies on.
    pub fn check(&self) -> Result<(), String> {
        self.validate().map_err(|err| err.to_string())?;

        let mut seen = HashSet::with_capacity(self.questions.len());
        for question in &self.questions {
            if !seen.insert(question.id.as_str()) {
                return Err(format!("duplicate question id '{}'", question.id));
            }

            if question.kind.takes_choice() {
                if question.options.len() < 2 {
                    return Err(format!(
                        "multiple-choice question '{}' needs at least two options",
                        question.id
                    ));
                }
                if let Some(index) = question.correct_answer_index {
                    if index >= question.options.len() {
                        return Err(format!(
                            "question '{}' has correct_answer_index {} out of range",
                            question.id, index
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}

fn default_required() -> bool {
    true
}

fn default_show_timer() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exam_json() -> serde_json::Value {
        json!({
            "id": "E1",
            "title": "Midterm",
            "duration": 10,
            "totalPoints": 20,
            "passPercentage": 60,
            "shuffleOptions": true,
            "questions": [
                {
                    "id": "Q1",
                    "type": "multiple-choice",
                    "question": "Pick B",
                    "points": 10,
                    "options": ["A", "B", "C"],
                    "correctAnswerIndex": 1
                },
                {
                    "id": "Q2",
                    "type": "text",
                    "question": "Explain",
                    "points": 10,
                    "required": false,
                    "maxLength": 200
                }
            ]
        })
    }

    #[test]
    fn deserializes_wire_aliases_and_defaults() {
        let exam: Exam = serde_json::from_value(exam_json()).expect("exam");
        assert_eq!(exam.duration_minutes, 10);
        assert_eq!(exam.duration_seconds(), 600);
        assert!(exam.show_timer);
        assert!(!exam.allow_navigation);
        assert!(exam.questions[0].required);
        assert_eq!(exam.questions[1].kind, QuestionType::ShortAnswer);
        assert!(!exam.questions[1].required);
        assert!(exam.check().is_ok());
    }

    #[test]
    fn check_rejects_duplicate_ids() {
        let mut exam: Exam = serde_json::from_value(exam_json()).expect("exam");
        exam.questions[1].id = "Q1".to_string();
        let err = exam.check().expect_err("duplicate");
        assert!(err.contains("duplicate question id"), "{err}");
    }

    #[test]
    fn check_rejects_out_of_range_correct_index() {
        let mut exam: Exam = serde_json::from_value(exam_json()).expect("exam");
        exam.questions[0].correct_answer_index = Some(3);
        assert!(exam.check().is_err());
    }

    #[test]
    fn check_rejects_non_positive_points() {
        let mut exam: Exam = serde_json::from_value(exam_json()).expect("exam");
        exam.questions[0].points = 0.0;
        let err = exam.check().expect_err("points");
        assert!(err.contains("points must be positive"), "{err}");
    }
}
