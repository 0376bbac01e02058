use serde::Serialize;
use time::OffsetDateTime;

use super::timing;
use super::types::{Answer, ExamAttempt};
use crate::schemas::attempt::{SaveProgressRequest, SubmitRequest};
use crate::schemas::exam::Question;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub answered_questions: usize,
    pub total_questions: usize,
    pub percentage: u32,
    pub visited_questions: usize,
    pub visited_percentage: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionStatus {
    Unvisited,
    VisitedUnanswered,
    Answered,
    Flagged,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Validation {
    pub required_questions_answered: bool,
    /// Warnings never block submission; only the attempt's status does.
    pub can_submit: bool,
    pub warnings: Vec<String>,
    pub completion_rate: f64,
    pub answered_questions: usize,
    pub total_questions: usize,
}

/// A question as the student sees it: display position and display-order options.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayQuestion {
    pub position: usize,
    pub question: Question,
    pub options: Vec<String>,
    pub answer: Option<Answer>,
    pub status: QuestionStatus,
}

impl ExamAttempt {
    pub fn question_at(&self, position: usize) -> Option<&Question> {
        self.layout
            .original_question_index(position)
            .and_then(|original| self.exam.questions.get(original))
    }

    pub fn display_options(&self, question: &Question) -> Vec<String> {
        match self.layout.option_shuffle(&question.id) {
            Some(shuffle) => shuffle.shuffled_options.clone(),
            None => question.options.clone(),
        }
    }

    pub fn is_answered(&self, question_id: &str) -> bool {
        self.answers.get(question_id).is_some_and(|answer| !answer.is_blank())
    }

    pub fn answered_count(&self) -> usize {
        self.exam.questions.iter().filter(|question| self.is_answered(&question.id)).count()
    }

    pub fn progress(&self) -> Progress {
        let total_questions = self.exam.questions.len();
        let answered_questions = self.answered_count();
        let visited_questions = self.visited.len();

        Progress {
            answered_questions,
            total_questions,
            percentage: rounded_percentage(answered_questions, total_questions),
            visited_questions,
            visited_percentage: rounded_percentage(visited_questions, total_questions),
        }
    }

    pub fn question_status(&self, position: usize) -> Option<QuestionStatus> {
        let question = self.question_at(position)?;

        Some(if self.flagged.contains(&position) {
            QuestionStatus::Flagged
        } else if self.is_answered(&question.id) {
            QuestionStatus::Answered
        } else if self.visited.contains(&position) {
            QuestionStatus::VisitedUnanswered
        } else {
            QuestionStatus::Unvisited
        })
    }

    pub fn validation(&self) -> Validation {
        let total_questions = self.exam.questions.len();
        let answered_questions = self.answered_count();
        let unanswered_required = self
            .exam
            .questions
            .iter()
            .filter(|question| question.required && !self.is_answered(&question.id))
            .count();

        let mut warnings = Vec::new();
        if unanswered_required > 0 {
            warnings.push(format!(
                "{} not answered",
                count_label(unanswered_required, "required question", "required questions")
            ));
        }
        if answered_questions < total_questions {
            warnings.push(format!(
                "{} not answered",
                count_label(total_questions - answered_questions, "question", "questions")
            ));
        }
        if !self.flagged.is_empty() {
            warnings.push(format!(
                "{} flagged for review",
                count_label(self.flagged.len(), "question", "questions")
            ));
        }
        if self.expired {
            warnings.push("Time has expired; answers can no longer be changed".to_string());
        }

        let completion_rate = if total_questions > 0 {
            answered_questions as f64 / total_questions as f64 * 100.0
        } else {
            0.0
        };

        Validation {
            required_questions_answered: unanswered_required == 0,
            can_submit: self.is_in_progress(),
            warnings,
            completion_rate,
            answered_questions,
            total_questions,
        }
    }

    pub fn display_questions(&self) -> Vec<DisplayQuestion> {
        (0..self.layout.question_order.len())
            .filter_map(|position| {
                let question = self.question_at(position)?;
                Some(DisplayQuestion {
                    position,
                    question: question.clone(),
                    options: self.display_options(question),
                    answer: self.answers.get(&question.id).cloned(),
                    status: self.question_status(position)?,
                })
            })
            .collect()
    }

    pub fn elapsed_seconds(&self, now: OffsetDateTime) -> u64 {
        if self.is_timed() {
            self.duration_seconds - self.time_remaining_seconds
        } else {
            timing::seconds_between(self.started_at, now)
        }
    }

    /// Snapshot for the save endpoint, with the revision it captures.
    pub fn save_request(&self, now: OffsetDateTime) -> (SaveProgressRequest, u64) {
        let request = SaveProgressRequest {
            response_id: self.response_id.clone(),
            exam_id: self.exam.id.clone(),
            answers: self.answers.clone(),
            flagged_indices: self.flagged.iter().copied().collect(),
            visited_indices: self.visited.iter().copied().collect(),
            current_question_index: self.current_index,
            elapsed_seconds: self.elapsed_seconds(now),
        };
        (request, self.revision)
    }

    pub fn submit_request(&self, now: OffsetDateTime) -> SubmitRequest {
        SubmitRequest {
            response_id: self.response_id.clone(),
            exam_id: self.exam.id.clone(),
            answers: self.answers.clone(),
            option_shuffle_map: self.layout.index_mappings(),
            question_order: self.layout.question_order.clone(),
            flagged_indices: self.flagged.iter().copied().collect(),
            time_spent_seconds: self.elapsed_seconds(now),
        }
    }
}

fn rounded_percentage(part: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (part as f64 / total as f64 * 100.0).round() as u32
}

fn count_label(count: usize, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("1 {singular}")
    } else {
        format!("{count} {plural}")
    }
}
