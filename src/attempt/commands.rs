use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use time::OffsetDateTime;

use super::shuffle::ShuffleLayout;
use super::timing;
use super::types::{Answer, AttemptStatus, ExamAttempt, Rejection, TickOutcome};
use crate::schemas::attempt::AttemptPayload;
use crate::schemas::exam::{Exam, QuestionType};

impl ExamAttempt {
    /// A fresh attempt positioned on the first question.
    pub fn begin(exam: Arc<Exam>, payload: &AttemptPayload, layout: ShuffleLayout) -> Self {
        let duration_seconds = timing::resolve_duration_seconds(&exam, payload.duration_seconds);
        let mut visited = BTreeSet::new();
        if !exam.questions.is_empty() {
            visited.insert(0);
        }

        Self {
            exam,
            response_id: payload.response_id.clone(),
            student_id: payload.student_id.clone(),
            status: AttemptStatus::InProgress,
            layout,
            answers: BTreeMap::new(),
            flagged: BTreeSet::new(),
            visited,
            current_index: 0,
            started_at: payload.started_at,
            last_saved_at: None,
            submitted_at: None,
            duration_seconds,
            time_remaining_seconds: duration_seconds,
            expired: false,
            revision: 0,
            saved_revision: 0,
        }
    }

    /// Rebuild an unfinished attempt from server state. Saved answers that no longer
    /// fit the exam are dropped rather than trusted.
    pub fn restore(exam: Arc<Exam>, payload: &AttemptPayload, layout: ShuffleLayout) -> Self {
        let mut attempt = Self::begin(exam, payload, layout);
        let question_count = attempt.exam.questions.len();

        attempt.time_remaining_seconds =
            timing::remaining_seconds(attempt.duration_seconds, payload.elapsed_seconds);
        attempt.expired = attempt.is_timed() && attempt.time_remaining_seconds == 0;

        for (question_id, answer) in payload.answers.clone().unwrap_or_default() {
            match attempt.check_answer(&question_id, answer) {
                Ok(answer) => {
                    attempt.answers.insert(question_id, answer);
                }
                Err(reason) => tracing::warn!(
                    response_id = %attempt.response_id,
                    question_id = %question_id,
                    reason = %reason,
                    "Dropping saved answer that does not fit the exam"
                ),
            }
        }

        attempt.flagged =
            payload.flagged_indices.iter().copied().filter(|&index| index < question_count).collect();
        attempt
            .visited
            .extend(payload.visited_indices.iter().copied().filter(|&index| index < question_count));
        if let Some(index) = payload.current_question_index.filter(|&index| index < question_count) {
            attempt.current_index = index;
            attempt.visited.insert(index);
        }

        attempt
    }

    pub fn update_answer(&mut self, question_id: &str, answer: Answer) -> Result<bool, Rejection> {
        self.ensure_answerable()?;
        let answer = self.check_answer(question_id, answer)?;

        if self.answers.get(question_id) == Some(&answer) {
            return Ok(false);
        }

        self.answers.insert(question_id.to_string(), answer);
        self.revision += 1;
        Ok(true)
    }

    pub fn clear_answer(&mut self, question_id: &str) -> Result<bool, Rejection> {
        self.ensure_answerable()?;
        if self.exam.question(question_id).is_none() {
            return Err(Rejection::UnknownQuestion);
        }

        let removed = self.answers.remove(question_id).is_some();
        if removed {
            self.revision += 1;
        }
        Ok(removed)
    }

    /// Returns whether the position is flagged after the toggle.
    pub fn toggle_flag(&mut self, index: usize) -> Result<bool, Rejection> {
        if !self.is_in_progress() {
            return Err(Rejection::NotInProgress);
        }
        if index >= self.exam.questions.len() {
            return Err(Rejection::IndexOutOfRange);
        }

        let flagged = if self.flagged.remove(&index) {
            false
        } else {
            self.flagged.insert(index);
            true
        };
        self.revision += 1;
        Ok(flagged)
    }

    pub fn go_to(&mut self, index: usize) -> Result<(), Rejection> {
        if index >= self.exam.questions.len() {
            return Err(Rejection::IndexOutOfRange);
        }
        if !self.exam.allow_navigation && index.abs_diff(self.current_index) != 1 {
            return Err(Rejection::NavigationRestricted);
        }

        self.current_index = index;
        let newly_visited = self.visited.insert(index);
        if self.is_in_progress() {
            self.revision += 1;
        }
        if newly_visited {
            tracing::debug!(response_id = %self.response_id, index, "Question visited");
        }
        Ok(())
    }

    pub fn go_to_next(&mut self) -> Result<(), Rejection> {
        self.go_to(self.current_index + 1)
    }

    pub fn go_to_previous(&mut self) -> Result<(), Rejection> {
        let index = self.current_index.checked_sub(1).ok_or(Rejection::IndexOutOfRange)?;
        self.go_to(index)
    }

    /// One second of countdown.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.is_in_progress() {
            return TickOutcome::Stopped;
        }
        if !self.is_timed() {
            return TickOutcome::Untimed;
        }
        if self.expired {
            return TickOutcome::Idle;
        }

        self.time_remaining_seconds = self.time_remaining_seconds.saturating_sub(1);
        if self.time_remaining_seconds > 0 {
            return TickOutcome::Running;
        }

        self.expired = true;
        if self.exam.auto_submit {
            TickOutcome::AutoSubmit
        } else {
            TickOutcome::Expired
        }
    }

    pub fn mark_saved(&mut self, revision: u64, saved_at: OffsetDateTime) {
        self.last_saved_at = Some(saved_at);
        self.saved_revision = self.saved_revision.max(revision);
    }

    pub fn mark_submitted(&mut self, submitted_at: OffsetDateTime, graded: bool) {
        self.status = if graded { AttemptStatus::Graded } else { AttemptStatus::Submitted };
        self.submitted_at = Some(submitted_at);
        self.saved_revision = self.revision;
    }

    fn ensure_answerable(&self) -> Result<(), Rejection> {
        if !self.is_in_progress() {
            return Err(Rejection::NotInProgress);
        }
        if self.expired {
            return Err(Rejection::Expired);
        }
        Ok(())
    }

    /// Validates an answer against its question and returns the stored form.
    pub(super) fn check_answer(&self, question_id: &str, answer: Answer) -> Result<Answer, Rejection> {
        let question = self.exam.question(question_id).ok_or(Rejection::UnknownQuestion)?;

        match (question.kind, answer) {
            (QuestionType::MultipleChoice, Answer::Choice(index)) => {
                if index < question.option_count() {
                    Ok(Answer::Choice(index))
                } else {
                    Err(Rejection::ChoiceOutOfRange)
                }
            }
            (QuestionType::TrueFalse, Answer::Text(value)) => {
                let token = value.trim().to_ascii_lowercase();
                match token.as_str() {
                    "" | "true" | "false" => Ok(Answer::Text(token)),
                    _ => Err(Rejection::InvalidToken),
                }
            }
            (QuestionType::ShortAnswer | QuestionType::Essay, Answer::Text(value)) => {
                match question.max_length {
                    Some(limit) if value.chars().count() > limit => Err(Rejection::TooLong),
                    _ => Ok(Answer::Text(value)),
                }
            }
            _ => Err(Rejection::KindMismatch),
        }
    }
}
