use serde::Serialize;

use super::shuffle::OptionShuffle;
use super::types::{Answer, ExamAttempt};
use crate::schemas::exam::{Question, QuestionType};
use crate::schemas::result::{ExamResult, QuestionResult};

/// Human-readable answer pair for one question, with shuffling undone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerReview {
    pub student_answer: Option<String>,
    pub correct_answer: Option<String>,
    /// `None` when correctness cannot be decided locally.
    pub is_correct: Option<bool>,
}

/// Advisory score over the questions the client can check on its own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScorePreview {
    pub earned_points: f64,
    pub gradable_points: f64,
    pub gradable_questions: usize,
    pub ungraded_questions: usize,
    pub percentage: f64,
}

pub fn review_answer(
    question: &Question,
    answer: Option<&Answer>,
    shuffle: Option<&OptionShuffle>,
) -> AnswerReview {
    match question.kind {
        QuestionType::MultipleChoice => {
            let (student_answer, original_index) = match (answer, shuffle) {
                (Some(Answer::Choice(displayed)), Some(shuffle)) => (
                    shuffle.option_text(*displayed).map(str::to_string),
                    shuffle.original_index(*displayed),
                ),
                (Some(Answer::Choice(displayed)), None) => {
                    (question.options.get(*displayed).cloned(), Some(*displayed))
                }
                _ => (None, None),
            };
            let correct_answer =
                question.correct_answer_index.and_then(|index| question.options.get(index)).cloned();
            let is_correct =
                question.correct_answer_index.map(|correct| original_index == Some(correct));

            AnswerReview { student_answer, correct_answer, is_correct }
        }
        QuestionType::TrueFalse => {
            let student_answer = non_blank_text(answer);
            let correct_answer = question.correct_answer.clone();
            let is_correct = correct_answer.as_deref().map(|correct| {
                student_answer.as_deref().is_some_and(|given| given.eq_ignore_ascii_case(correct.trim()))
            });

            AnswerReview { student_answer, correct_answer, is_correct }
        }
        QuestionType::ShortAnswer => {
            let student_answer = non_blank_text(answer);
            let accepted: Vec<&str> = question
                .acceptable_answers
                .iter()
                .map(String::as_str)
                .chain(question.correct_answer.as_deref())
                .collect();
            let correct_answer = accepted.first().map(|value| value.to_string());
            let is_correct = (!accepted.is_empty()).then(|| {
                student_answer.as_deref().is_some_and(|given| {
                    accepted.iter().any(|candidate| normalize(candidate) == normalize(given))
                })
            });

            AnswerReview { student_answer, correct_answer, is_correct }
        }
        QuestionType::Essay => {
            AnswerReview { student_answer: non_blank_text(answer), correct_answer: None, is_correct: None }
        }
    }
}

impl ExamAttempt {
    pub fn review(&self, question: &Question) -> AnswerReview {
        review_answer(question, self.answer(&question.id), self.layout.option_shuffle(&question.id))
    }

    pub fn preview_score(&self) -> ScorePreview {
        let mut earned_points = 0.0;
        let mut gradable_points = 0.0;
        let mut gradable_questions = 0;
        let mut ungraded_questions = 0;

        for question in &self.exam.questions {
            match self.review(question).is_correct {
                Some(correct) => {
                    gradable_questions += 1;
                    gradable_points += question.points;
                    if correct {
                        earned_points += question.points;
                    }
                }
                None => ungraded_questions += 1,
            }
        }

        let percentage =
            if gradable_points > 0.0 { earned_points / gradable_points * 100.0 } else { 0.0 };

        ScorePreview {
            earned_points,
            gradable_points,
            gradable_questions,
            ungraded_questions,
            percentage,
        }
    }

    /// Fill in the per-question breakdown when the server only sent scores.
    pub fn detailed_results(&self, result: &ExamResult) -> ExamResult {
        if result.has_breakdown() {
            return result.clone();
        }

        let question_results = (0..self.layout.question_order.len())
            .filter_map(|position| self.question_at(position))
            .map(|question| {
                let review = self.review(question);
                let server_score = result.question_scores.get(&question.id).copied();
                let is_correct = match (question.kind, server_score) {
                    (QuestionType::ShortAnswer, Some(score)) => Some(score > 0.0),
                    _ => review.is_correct,
                };

                QuestionResult {
                    question_id: question.id.clone(),
                    student_answer: review.student_answer,
                    correct_answer: review.correct_answer,
                    earned_points: server_score.unwrap_or(0.0),
                    max_points: question.points,
                    is_correct,
                }
            })
            .collect();

        ExamResult { question_results, ..result.clone() }
    }
}

fn non_blank_text(answer: Option<&Answer>) -> Option<String> {
    match answer {
        Some(Answer::Text(value)) if !value.is_empty() => Some(value.clone()),
        _ => None,
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}
