use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::attempt::{
    Answer, AttemptStatus, DisplayQuestion, ExamAttempt, Progress, QuestionStatus, Rejection,
    ScorePreview, ShuffleLayout, TickOutcome, Validation,
};
use crate::core::config::Settings;
use crate::core::{metrics, time as clock};
use crate::errors::EngineError;
use crate::schemas::attempt::{
    ActiveAttempt, AttemptPayload, AttemptSummary, StartAttemptRequest, SubmitResponse,
};
use crate::schemas::exam::Exam;
use crate::schemas::result::ExamResult;
use crate::services::backend::ExamBackend;
use crate::tasks::attempt_timers::AttemptTimers;

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub auto_save_enabled: bool,
    pub auto_save_interval: Duration,
}

impl EngineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        let attempt = settings.attempt();
        Self {
            auto_save_enabled: attempt.auto_save_enabled,
            auto_save_interval: attempt.auto_save_interval(),
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self { auto_save_enabled: true, auto_save_interval: Duration::from_secs(30) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// Nothing changed since the last successful save.
    Unchanged,
    /// Another save holds the gate; this unforced save was dropped.
    InFlight,
}

/// Everything the presentation layer renders, captured under one lock.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptView {
    pub exam_id: Option<String>,
    pub title: Option<String>,
    pub response_id: Option<String>,
    pub status: AttemptStatus,
    pub questions: Vec<DisplayQuestion>,
    pub current_question_index: usize,
    pub flagged_question_indices: Vec<usize>,
    pub visited_question_indices: Vec<usize>,
    pub progress: Option<Progress>,
    pub validation: Option<Validation>,
    pub show_timer: bool,
    pub time_remaining_seconds: Option<u64>,
    pub time_remaining_label: Option<String>,
    pub is_expired: bool,
    pub is_loading: bool,
    pub is_submitting: bool,
    pub auto_save_enabled: bool,
    pub has_unsaved_changes: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_saved_at: Option<OffsetDateTime>,
    pub result: Option<ExamResult>,
    pub error: Option<String>,
}

#[derive(Default)]
struct EngineState {
    exam: Option<Arc<Exam>>,
    attempt: Option<ExamAttempt>,
    result: Option<ExamResult>,
    error: Option<EngineError>,
    loading: bool,
    submitting: bool,
    auto_save_enabled: bool,
}

struct EngineInner {
    backend: Arc<dyn ExamBackend>,
    options: EngineOptions,
    state: Mutex<EngineState>,
    save_gate: tokio::sync::Mutex<()>,
    boundary: Arc<Notify>,
    timers: Mutex<Option<AttemptTimers>>,
}

/// Drives one exam-taking session. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct ExamAttemptEngine {
    inner: Arc<EngineInner>,
}

/// Handle held by background loops so they never keep the engine alive.
#[derive(Clone)]
pub(crate) struct WeakEngine(Weak<EngineInner>);

impl WeakEngine {
    pub(crate) fn upgrade(&self) -> Option<ExamAttemptEngine> {
        self.0.upgrade().map(|inner| ExamAttemptEngine { inner })
    }
}

/// Resets a busy flag on drop, including when the owning future is cancelled.
struct BusyFlag<'a> {
    engine: &'a ExamAttemptEngine,
    field: fn(&mut EngineState) -> &mut bool,
}

fn loading_flag(state: &mut EngineState) -> &mut bool {
    &mut state.loading
}

fn submitting_flag(state: &mut EngineState) -> &mut bool {
    &mut state.submitting
}

impl Drop for BusyFlag<'_> {
    fn drop(&mut self) {
        *(self.field)(&mut self.engine.lock_state()) = false;
    }
}

impl ExamAttemptEngine {
    pub fn new(backend: Arc<dyn ExamBackend>, options: EngineOptions) -> Self {
        let state = EngineState { auto_save_enabled: options.auto_save_enabled, ..Default::default() };
        Self {
            inner: Arc::new(EngineInner {
                backend,
                options,
                state: Mutex::new(state),
                save_gate: tokio::sync::Mutex::new(()),
                boundary: Arc::new(Notify::new()),
                timers: Mutex::new(None),
            }),
        }
    }

    pub fn options(&self) -> EngineOptions {
        self.inner.options
    }

    pub(crate) fn downgrade(&self) -> WeakEngine {
        WeakEngine(Arc::downgrade(&self.inner))
    }

    pub(crate) fn boundary(&self) -> Arc<Notify> {
        self.inner.boundary.clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_error(&self, err: EngineError) -> EngineError {
        self.lock_state().error = Some(err.clone());
        err
    }

    /// Marks the engine busy loading, refusing when a session is already active.
    fn begin_loading(&self) -> Result<BusyFlag<'_>, EngineError> {
        let mut state = self.lock_state();
        if state.loading || state.attempt.as_ref().is_some_and(ExamAttempt::is_in_progress) {
            return Err(EngineError::AttemptInProgress);
        }
        state.loading = true;
        state.error = None;
        Ok(BusyFlag { engine: self, field: loading_flag })
    }

    pub async fn start_exam(&self, exam_id: &str) -> Result<(), EngineError> {
        let _loading = self.begin_loading()?;
        match self.start_inner(exam_id).await {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::warn!(exam_id, error = %err, "Failed to start exam attempt");
                Err(self.record_error(err))
            }
        }
    }

    async fn start_inner(&self, exam_id: &str) -> Result<(), EngineError> {
        let backend = &self.inner.backend;

        let eligibility = backend.check_eligibility(exam_id).await?;
        if !eligibility.can_take {
            return Err(EngineError::CannotTakeExam {
                reason: eligibility.reason.unwrap_or_else(|| "Exam is not available".to_string()),
            });
        }

        let exam = backend.fetch_exam(exam_id).await?;
        exam.check().map_err(EngineError::InvalidExam)?;
        let exam = Arc::new(exam);

        if eligibility.has_active_attempt {
            tracing::info!(exam_id, "Unfinished attempt found; resuming");
            let payload = backend.resume_attempt(exam_id).await?;
            return self.install_existing(exam, payload).await;
        }

        let layout = ShuffleLayout::generate(&exam, rand::random());
        let payload = backend
            .start_attempt(exam_id, &StartAttemptRequest { shuffle: layout.clone() })
            .await?;

        if payload.is_existing() {
            tracing::info!(exam_id, response_id = %payload.response_id, "Server returned an existing attempt");
            return self.install_existing(exam, payload).await;
        }

        let attempt = ExamAttempt::begin(exam.clone(), &payload, layout);
        tracing::info!(
            exam_id,
            response_id = %attempt.response_id(),
            duration_seconds = attempt.time_remaining_seconds().unwrap_or(0),
            "Exam attempt started"
        );
        self.install(exam, attempt);
        Ok(())
    }

    pub async fn resume_exam_attempt(&self, exam_id: &str) -> Result<(), EngineError> {
        let _loading = self.begin_loading()?;
        match self.resume_inner(exam_id).await {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::warn!(exam_id, error = %err, "Failed to resume exam attempt");
                Err(self.record_error(err))
            }
        }
    }

    async fn resume_inner(&self, exam_id: &str) -> Result<(), EngineError> {
        let mut payload = self.inner.backend.resume_attempt(exam_id).await?;
        let exam = match payload.exam.take() {
            Some(exam) => exam,
            None => self.inner.backend.fetch_exam(exam_id).await?,
        };
        exam.check().map_err(EngineError::InvalidExam)?;
        self.install_existing(Arc::new(exam), payload).await
    }

    /// Installs a server-side attempt. One whose time already ran out is submitted at once
    /// when the exam auto-submits, otherwise it comes back read-only.
    async fn install_existing(
        &self,
        exam: Arc<Exam>,
        payload: AttemptPayload,
    ) -> Result<(), EngineError> {
        if payload.status.is_some_and(AttemptStatus::is_final) {
            return Err(EngineError::CannotTakeExam {
                reason: "Attempt has already been submitted".to_string(),
            });
        }

        let layout = ShuffleLayout::restore(&exam, payload.shuffle.clone(), payload.shuffle_seed)
            .map_err(EngineError::ShuffleUnavailable)?;
        let attempt = ExamAttempt::restore(exam.clone(), &payload, layout);
        tracing::info!(
            exam_id = %exam.id,
            response_id = %attempt.response_id(),
            answered = attempt.answered_count(),
            elapsed_seconds = payload.elapsed_seconds,
            "Exam attempt resumed"
        );
        let expired = attempt.is_expired();
        self.install(exam.clone(), attempt);

        if expired && exam.auto_submit {
            tracing::info!(exam_id = %exam.id, "Resumed attempt is out of time; submitting automatically");
            if let Err(err) = self.submit_exam().await {
                tracing::error!(error = %err, "Automatic submission failed");
            }
        } else if expired {
            tracing::info!(exam_id = %exam.id, "Resumed attempt is out of time; answers are read-only");
        }
        Ok(())
    }

    fn install(&self, exam: Arc<Exam>, attempt: ExamAttempt) {
        let timed = attempt.is_timed();
        {
            let mut state = self.lock_state();
            state.exam = Some(exam);
            state.attempt = Some(attempt);
            state.result = None;
            state.error = None;
        }

        let timers = AttemptTimers::spawn(self, timed);
        self.replace_timers(Some(timers));
    }

    fn replace_timers(&self, timers: Option<AttemptTimers>) {
        let previous = {
            let mut slot = self.inner.timers.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *slot, timers)
        };
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    /// Stops the timers and fires one best-effort forced save. Callers need not await the handle.
    pub fn close(&self) -> JoinHandle<Result<SaveOutcome, EngineError>> {
        self.replace_timers(None);
        let engine = self.clone();
        tokio::spawn(async move {
            let in_progress =
                engine.lock_state().attempt.as_ref().is_some_and(ExamAttempt::is_in_progress);
            if !in_progress {
                return Err(EngineError::NotInProgress);
            }
            let outcome = engine.save_progress(true).await;
            if let Err(err) = &outcome {
                tracing::warn!(error = %err, "Final save on close failed");
            }
            outcome
        })
    }

    fn mutate<T>(
        &self,
        transition: impl FnOnce(&mut ExamAttempt) -> Result<T, Rejection>,
    ) -> Result<T, Rejection> {
        let mut state = self.lock_state();
        if state.submitting {
            return Err(Rejection::Submitting);
        }
        let attempt = state.attempt.as_mut().ok_or(Rejection::NotInProgress)?;
        let outcome = transition(attempt);
        if let Err(reason) = &outcome {
            tracing::debug!(reason = %reason, "Ignoring attempt transition");
        }
        outcome
    }

    /// Returns whether the stored answers changed.
    pub fn update_answer(&self, question_id: &str, answer: Answer) -> Result<bool, Rejection> {
        self.mutate(|attempt| attempt.update_answer(question_id, answer))
    }

    pub fn clear_answer(&self, question_id: &str) -> Result<bool, Rejection> {
        self.mutate(|attempt| attempt.clear_answer(question_id))
    }

    pub fn flag_question(&self, index: usize) -> Result<bool, Rejection> {
        self.mutate(|attempt| attempt.toggle_flag(index))
    }

    fn navigate(
        &self,
        transition: impl FnOnce(&mut ExamAttempt) -> Result<(), Rejection>,
    ) -> Result<(), Rejection> {
        let outcome = {
            let mut state = self.lock_state();
            let attempt = state.attempt.as_mut().ok_or(Rejection::NotInProgress)?;
            transition(attempt)
        };
        match &outcome {
            Ok(()) => self.inner.boundary.notify_one(),
            Err(reason) => tracing::debug!(reason = %reason, "Ignoring navigation"),
        }
        outcome
    }

    pub fn go_to_question(&self, index: usize) -> Result<(), Rejection> {
        self.navigate(|attempt| attempt.go_to(index))
    }

    pub fn go_to_next_question(&self) -> Result<(), Rejection> {
        self.navigate(ExamAttempt::go_to_next)
    }

    pub fn go_to_previous_question(&self) -> Result<(), Rejection> {
        self.navigate(ExamAttempt::go_to_previous)
    }

    /// Hiding the exam view is a save boundary.
    pub fn visibility_changed(&self, hidden: bool) {
        if hidden {
            self.inner.boundary.notify_one();
        }
    }

    pub fn set_autosave_enabled(&self, enabled: bool) {
        self.lock_state().auto_save_enabled = enabled;
    }

    pub fn autosave_enabled(&self) -> bool {
        self.lock_state().auto_save_enabled
    }

    pub fn exam(&self) -> Option<Arc<Exam>> {
        self.lock_state().exam.clone()
    }

    pub fn attempt(&self) -> Option<ExamAttempt> {
        self.lock_state().attempt.clone()
    }

    pub fn status(&self) -> AttemptStatus {
        self.lock_state().attempt.as_ref().map_or(AttemptStatus::NotStarted, ExamAttempt::status)
    }

    pub fn last_error(&self) -> Option<EngineError> {
        self.lock_state().error.clone()
    }

    pub fn result(&self) -> Option<ExamResult> {
        self.lock_state().result.clone()
    }

    pub fn get_progress(&self) -> Option<Progress> {
        self.lock_state().attempt.as_ref().map(ExamAttempt::progress)
    }

    pub fn get_question_status(&self, index: usize) -> Option<QuestionStatus> {
        self.lock_state().attempt.as_ref().and_then(|attempt| attempt.question_status(index))
    }

    pub fn validation(&self) -> Option<Validation> {
        let state = self.lock_state();
        let mut validation = state.attempt.as_ref().map(ExamAttempt::validation)?;
        validation.can_submit &= !state.submitting;
        Some(validation)
    }

    pub fn preview_score(&self) -> Option<ScorePreview> {
        self.lock_state().attempt.as_ref().map(ExamAttempt::preview_score)
    }

    pub fn format_time(seconds: u64) -> String {
        clock::format_clock(seconds)
    }

    pub fn view(&self) -> AttemptView {
        let state = self.lock_state();
        let attempt = state.attempt.as_ref();
        let validation = attempt.map(|attempt| {
            let mut validation = attempt.validation();
            validation.can_submit &= !state.submitting;
            validation
        });
        let time_remaining_seconds = attempt.and_then(ExamAttempt::time_remaining_seconds);

        AttemptView {
            exam_id: state.exam.as_ref().map(|exam| exam.id.clone()),
            title: state.exam.as_ref().map(|exam| exam.title.clone()),
            response_id: attempt.map(|attempt| attempt.response_id().to_string()),
            status: attempt.map_or(AttemptStatus::NotStarted, ExamAttempt::status),
            questions: attempt.map(ExamAttempt::display_questions).unwrap_or_default(),
            current_question_index: attempt.map_or(0, ExamAttempt::current_question_index),
            flagged_question_indices: attempt
                .map(|attempt| attempt.flagged_question_indices().iter().copied().collect())
                .unwrap_or_default(),
            visited_question_indices: attempt
                .map(|attempt| attempt.visited_question_indices().iter().copied().collect())
                .unwrap_or_default(),
            progress: attempt.map(ExamAttempt::progress),
            validation,
            show_timer: state.exam.as_ref().is_some_and(|exam| exam.show_timer),
            time_remaining_seconds,
            time_remaining_label: time_remaining_seconds.map(clock::format_clock),
            is_expired: attempt.is_some_and(ExamAttempt::is_expired),
            is_loading: state.loading,
            is_submitting: state.submitting,
            auto_save_enabled: state.auto_save_enabled,
            has_unsaved_changes: attempt.is_some_and(ExamAttempt::has_unsaved_changes),
            last_saved_at: attempt.and_then(ExamAttempt::last_saved_at),
            result: state.result.clone(),
            error: state.error.as_ref().map(ToString::to_string),
        }
    }

    /// Pushes the current snapshot. Unforced saves skip clean state and never wait on
    /// another save; forced saves queue behind it.
    pub async fn save_progress(&self, force: bool) -> Result<SaveOutcome, EngineError> {
        let _gate = if force {
            self.inner.save_gate.lock().await
        } else {
            match self.inner.save_gate.try_lock() {
                Ok(gate) => gate,
                Err(_) => {
                    tracing::debug!("Save already in flight; dropping unforced save");
                    metrics::record_autosave("skipped");
                    return Ok(SaveOutcome::InFlight);
                }
            }
        };

        let (request, revision) = {
            let state = self.lock_state();
            let attempt = state.attempt.as_ref().ok_or(EngineError::NoActiveAttempt)?;
            if !attempt.is_in_progress() {
                return Err(EngineError::NotInProgress);
            }
            if !force && !attempt.has_unsaved_changes() {
                return Ok(SaveOutcome::Unchanged);
            }
            attempt.save_request(clock::now_utc())
        };

        match self.inner.backend.save_progress(&request).await {
            Ok(ack) => {
                let saved_at = ack.saved_at.unwrap_or_else(clock::now_utc);
                let mut state = self.lock_state();
                if let Some(attempt) = state.attempt.as_mut() {
                    if attempt.response_id() == request.response_id {
                        attempt.mark_saved(revision, saved_at);
                    }
                }
                if state.error.as_ref().is_some_and(EngineError::is_retryable) {
                    state.error = None;
                }
                drop(state);

                metrics::record_autosave("saved");
                tracing::debug!(
                    response_id = %request.response_id,
                    revision,
                    answers = request.answers.len(),
                    "Attempt progress saved"
                );
                Ok(SaveOutcome::Saved)
            }
            Err(err) => {
                metrics::record_autosave("failed");
                tracing::warn!(
                    response_id = %request.response_id,
                    error = %err,
                    "Failed to save attempt progress"
                );
                Err(self.record_error(err.into()))
            }
        }
    }

    pub async fn submit_exam(&self) -> Result<SubmitResponse, EngineError> {
        let _submitting = {
            let mut state = self.lock_state();
            let attempt = state.attempt.as_ref().ok_or(EngineError::NoActiveAttempt)?;
            if !attempt.is_in_progress() {
                return Err(EngineError::NotInProgress);
            }
            if state.submitting {
                return Err(EngineError::SubmissionInFlight);
            }
            state.submitting = true;
            BusyFlag { engine: self, field: submitting_flag }
        };
        let _gate = self.inner.save_gate.lock().await;

        let (request, show_results) = {
            let state = self.lock_state();
            let attempt = state.attempt.as_ref().ok_or(EngineError::NoActiveAttempt)?;
            if !attempt.is_in_progress() {
                return Err(EngineError::NotInProgress);
            }
            (attempt.submit_request(clock::now_utc()), attempt.exam().show_results)
        };

        match self.inner.backend.submit(&request).await {
            Ok(response) => {
                {
                    let mut state = self.lock_state();
                    if let Some(attempt) = state.attempt.as_mut() {
                        attempt.mark_submitted(clock::now_utc(), response.graded);
                    }
                    if show_results {
                        state.result = response.result.clone();
                    }
                    state.error = None;
                }
                self.replace_timers(None);

                metrics::record_submit(if response.graded { "graded" } else { "submitted" });
                tracing::info!(
                    response_id = %request.response_id,
                    exam_id = %request.exam_id,
                    graded = response.graded,
                    time_spent_seconds = request.time_spent_seconds,
                    "Exam attempt submitted"
                );
                Ok(response)
            }
            Err(err) => {
                metrics::record_submit("failed");
                tracing::error!(
                    response_id = %request.response_id,
                    error = %err,
                    "Failed to submit exam attempt"
                );
                Err(self.record_error(err.into()))
            }
        }
    }

    fn response_id(&self) -> Result<String, EngineError> {
        self.lock_state()
            .attempt
            .as_ref()
            .map(|attempt| attempt.response_id().to_string())
            .ok_or(EngineError::NoActiveAttempt)
    }

    pub async fn get_exam_results(&self) -> Result<ExamResult, EngineError> {
        let response_id = self.response_id()?;
        match self.inner.backend.fetch_results(&response_id).await {
            Ok(result) => {
                self.lock_state().result = Some(result.clone());
                Ok(result)
            }
            Err(err) => Err(self.record_error(err.into())),
        }
    }

    /// Results with shuffling undone for "your answer" and "correct answer".
    pub async fn get_detailed_results(&self) -> Result<ExamResult, EngineError> {
        let response_id = self.response_id()?;
        let result = match self.inner.backend.fetch_detailed_results(&response_id).await {
            Ok(result) => result,
            Err(err) => return Err(self.record_error(err.into())),
        };

        let mut state = self.lock_state();
        let detailed = match state.attempt.as_ref() {
            Some(attempt) => attempt.detailed_results(&result),
            None => result,
        };
        state.result = Some(detailed.clone());
        Ok(detailed)
    }

    pub async fn attempt_history(&self, exam_id: &str) -> Result<Vec<AttemptSummary>, EngineError> {
        self.inner
            .backend
            .attempt_history(exam_id)
            .await
            .map_err(|err| self.record_error(err.into()))
    }

    pub async fn check_active_attempt(&self, exam_id: &str) -> Result<ActiveAttempt, EngineError> {
        self.inner
            .backend
            .active_attempt(exam_id)
            .await
            .map_err(|err| self.record_error(err.into()))
    }

    /// One countdown second. Returns whether the tick loop should keep running.
    pub(crate) async fn on_tick(&self) -> bool {
        let outcome = match self.lock_state().attempt.as_mut() {
            Some(attempt) => attempt.tick(),
            None => TickOutcome::Stopped,
        };

        match outcome {
            TickOutcome::Running => true,
            TickOutcome::Expired => {
                tracing::info!("Exam time expired; answers are now read-only");
                false
            }
            TickOutcome::AutoSubmit => {
                tracing::info!("Exam time expired; submitting automatically");
                if let Err(err) = self.submit_exam().await {
                    tracing::error!(error = %err, "Automatic submission failed");
                }
                false
            }
            TickOutcome::Untimed | TickOutcome::Idle | TickOutcome::Stopped => false,
        }
    }

    /// One autosave opportunity. Returns whether the autosave loop should keep running.
    pub(crate) async fn on_autosave(&self) -> bool {
        if !self.autosave_enabled() {
            return self.lock_state().attempt.as_ref().is_some_and(ExamAttempt::is_in_progress);
        }

        match self.save_progress(false).await {
            Ok(_) => true,
            Err(EngineError::NotInProgress | EngineError::NoActiveAttempt) => false,
            // Already logged and recorded; the next interval retries.
            Err(_) => true,
        }
    }
}
