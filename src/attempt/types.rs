use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use super::shuffle::ShuffleLayout;
use crate::schemas::exam::Exam;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    NotStarted,
    InProgress,
    Submitted,
    Graded,
}

impl AttemptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptStatus::NotStarted => "NOT_STARTED",
            AttemptStatus::InProgress => "IN_PROGRESS",
            AttemptStatus::Submitted => "SUBMITTED",
            AttemptStatus::Graded => "GRADED",
        }
    }

    pub fn is_final(self) -> bool {
        matches!(self, AttemptStatus::Submitted | AttemptStatus::Graded)
    }
}

/// A stored answer. Multiple-choice answers hold the *displayed* option index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Choice(usize),
    Text(String),
}

impl Answer {
    pub fn text(value: impl Into<String>) -> Self {
        Answer::Text(value.into())
    }

    /// An explicit empty text answer counts as unanswered.
    pub fn is_blank(&self) -> bool {
        matches!(self, Answer::Text(value) if value.is_empty())
    }
}

/// Why a local transition was refused. Refusals are no-ops, never panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("attempt is not in progress")]
    NotInProgress,
    #[error("time for this attempt has expired")]
    Expired,
    #[error("question is not part of this exam")]
    UnknownQuestion,
    #[error("answer kind does not match the question type")]
    KindMismatch,
    #[error("choice is outside the question's options")]
    ChoiceOutOfRange,
    #[error("true/false answers must be \"true\" or \"false\"")]
    InvalidToken,
    #[error("answer exceeds the question's maximum length")]
    TooLong,
    #[error("question index is out of range")]
    IndexOutOfRange,
    #[error("navigation is limited to adjacent questions")]
    NavigationRestricted,
    #[error("a submission is in flight")]
    Submitting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickOutcome {
    Running,
    Untimed,
    /// Time ran out and the exam does not auto-submit; answers are now frozen.
    Expired,
    /// Time ran out on an auto-submitting exam. Reported once per attempt.
    AutoSubmit,
    /// Already expired; nothing left to count.
    Idle,
    Stopped,
}

/// The mutable session aggregate. Every transition goes through `commands`.
#[derive(Debug, Clone)]
pub struct ExamAttempt {
    pub(super) exam: Arc<Exam>,
    pub(super) response_id: String,
    pub(super) student_id: String,
    pub(super) status: AttemptStatus,
    pub(super) layout: ShuffleLayout,
    pub(super) answers: BTreeMap<String, Answer>,
    pub(super) flagged: BTreeSet<usize>,
    pub(super) visited: BTreeSet<usize>,
    pub(super) current_index: usize,
    pub(super) started_at: OffsetDateTime,
    pub(super) last_saved_at: Option<OffsetDateTime>,
    pub(super) submitted_at: Option<OffsetDateTime>,
    pub(super) duration_seconds: u64,
    pub(super) time_remaining_seconds: u64,
    pub(super) expired: bool,
    pub(super) revision: u64,
    pub(super) saved_revision: u64,
}

impl ExamAttempt {
    pub fn exam(&self) -> &Arc<Exam> {
        &self.exam
    }

    pub fn response_id(&self) -> &str {
        &self.response_id
    }

    pub fn exam_id(&self) -> &str {
        &self.exam.id
    }

    pub fn student_id(&self) -> &str {
        &self.student_id
    }

    pub fn status(&self) -> AttemptStatus {
        self.status
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == AttemptStatus::InProgress
    }

    pub fn layout(&self) -> &ShuffleLayout {
        &self.layout
    }

    pub fn shuffled_question_order(&self) -> &[usize] {
        &self.layout.question_order
    }

    pub fn answers(&self) -> &BTreeMap<String, Answer> {
        &self.answers
    }

    pub fn answer(&self, question_id: &str) -> Option<&Answer> {
        self.answers.get(question_id)
    }

    pub fn flagged_question_indices(&self) -> &BTreeSet<usize> {
        &self.flagged
    }

    pub fn visited_question_indices(&self) -> &BTreeSet<usize> {
        &self.visited
    }

    pub fn current_question_index(&self) -> usize {
        self.current_index
    }

    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    pub fn last_saved_at(&self) -> Option<OffsetDateTime> {
        self.last_saved_at
    }

    pub fn submitted_at(&self) -> Option<OffsetDateTime> {
        self.submitted_at
    }

    pub fn is_timed(&self) -> bool {
        self.duration_seconds > 0
    }

    /// `None` for untimed exams.
    pub fn time_remaining_seconds(&self) -> Option<u64> {
        self.is_timed().then_some(self.time_remaining_seconds)
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.revision != self.saved_revision
    }
}
