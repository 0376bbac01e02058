use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::attempt::{Answer, AttemptStatus, ShuffleLayout};
use crate::errors::BackendError;
use crate::schemas::attempt::{
    ActiveAttempt, AttemptPayload, AttemptSummary, Eligibility, SaveAck, SaveProgressRequest,
    StartAttemptRequest, SubmitRequest, SubmitResponse,
};
use crate::schemas::exam::{Exam, Question, QuestionType};
use crate::schemas::result::ExamResult;
use crate::services::backend::ExamBackend;

const LMS_ENV_KEYS: &[&str] = &[
    "LMS_API_BASE_URL",
    "LMS_API_TOKEN",
    "LMS_REQUEST_TIMEOUT_SECONDS",
    "LMS_CONNECT_TIMEOUT_SECONDS",
    "LMS_MAX_RETRIES",
    "LMS_AUTO_SAVE_ENABLED",
    "LMS_AUTO_SAVE_INTERVAL_SECONDS",
    "LMS_ENV",
    "LMS_STRICT_CONFIG",
    "LMS_LOG_LEVEL",
    "LMS_LOG_JSON",
    "PROMETHEUS_ENABLED",
];

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn clear_lms_env() {
    for key in LMS_ENV_KEYS {
        std::env::remove_var(key);
    }
}

pub(crate) fn multiple_choice(id: &str, options: &[&str], correct: usize, points: f64) -> Question {
    Question {
        id: id.to_string(),
        kind: QuestionType::MultipleChoice,
        question: format!("Question {id}"),
        points,
        required: true,
        options: options.iter().map(|option| option.to_string()).collect(),
        correct_answer_index: Some(correct),
        correct_answer: None,
        acceptable_answers: Vec::new(),
        max_length: None,
    }
}

pub(crate) fn text_question(id: &str, kind: QuestionType, correct: Option<&str>) -> Question {
    Question {
        id: id.to_string(),
        kind,
        question: format!("Question {id}"),
        points: 5.0,
        required: true,
        options: Vec::new(),
        correct_answer_index: None,
        correct_answer: correct.map(str::to_string),
        acceptable_answers: Vec::new(),
        max_length: None,
    }
}

pub(crate) fn exam_with(id: &str, questions: Vec<Question>) -> Exam {
    let total_points = questions.iter().map(|question| question.points).sum();
    Exam {
        id: id.to_string(),
        title: format!("Exam {id}"),
        duration_minutes: 10,
        total_points,
        pass_percentage: 60.0,
        questions,
        shuffle_questions: false,
        shuffle_options: false,
        allow_navigation: true,
        show_timer: true,
        auto_submit: false,
        show_results: true,
        require_safe_browser: false,
    }
}

/// One multiple-choice question, options shuffled, ten minutes.
pub(crate) fn single_choice_exam() -> Exam {
    let mut exam = exam_with("E1", vec![multiple_choice("Q1", &["A", "B", "C"], 1, 10.0)]);
    exam.shuffle_options = true;
    exam
}

pub(crate) fn shuffled_exam() -> Exam {
    let mut essay = text_question("Q5", QuestionType::Essay, None);
    essay.required = false;
    essay.max_length = Some(500);

    let mut short = text_question("Q4", QuestionType::ShortAnswer, Some("Mitochondria"));
    short.acceptable_answers = vec!["mitochondrion".to_string()];

    let mut exam = exam_with(
        "E2",
        vec![
            multiple_choice("Q1", &["red", "green", "blue", "yellow"], 2, 4.0),
            multiple_choice("Q2", &["1", "2", "3"], 0, 3.0),
            text_question("Q3", QuestionType::TrueFalse, Some("true")),
            short,
            essay,
            multiple_choice("Q6", &["north", "south", "east", "west", "up"], 4, 2.0),
        ],
    );
    exam.shuffle_questions = true;
    exam.shuffle_options = true;
    exam
}

/// Three required questions (Q1..Q3) and two optional ones (Q4, Q5).
pub(crate) fn validation_exam() -> Exam {
    let mut questions = vec![
        multiple_choice("Q1", &["a", "b"], 0, 2.0),
        text_question("Q2", QuestionType::TrueFalse, Some("false")),
        text_question("Q3", QuestionType::ShortAnswer, Some("42")),
        text_question("Q4", QuestionType::Essay, None),
        multiple_choice("Q5", &["x", "y", "z"], 2, 1.0),
    ];
    questions[3].required = false;
    questions[4].required = false;
    exam_with("E3", questions)
}

pub(crate) fn fresh_payload(exam: &Exam) -> AttemptPayload {
    AttemptPayload {
        response_id: "R1".to_string(),
        exam_id: exam.id.clone(),
        student_id: "S1".to_string(),
        started_at: crate::core::time::now_utc(),
        duration_seconds: None,
        answers: None,
        flagged_indices: Vec::new(),
        visited_indices: Vec::new(),
        current_question_index: None,
        elapsed_seconds: 0,
        shuffle: None,
        shuffle_seed: None,
        status: None,
        exam: None,
    }
}

pub(crate) fn resumed_payload(
    exam: &Exam,
    layout: ShuffleLayout,
    answers: BTreeMap<String, Answer>,
    elapsed_seconds: u64,
) -> AttemptPayload {
    AttemptPayload {
        answers: Some(answers),
        elapsed_seconds,
        shuffle: Some(layout),
        status: Some(AttemptStatus::InProgress),
        ..fresh_payload(exam)
    }
}

/// In-memory exam service that records what the engine sends.
pub(crate) struct FakeBackend {
    exam: Exam,
    eligibility: StdMutex<Eligibility>,
    resume_payload: StdMutex<Option<AttemptPayload>>,
    submit_response: StdMutex<SubmitResponse>,
    pub(crate) starts: StdMutex<Vec<StartAttemptRequest>>,
    pub(crate) saves: StdMutex<Vec<SaveProgressRequest>>,
    pub(crate) submits: StdMutex<Vec<SubmitRequest>>,
    fail_saves: AtomicBool,
    fail_submits: AtomicBool,
    save_delay: StdMutex<Option<Duration>>,
}

impl FakeBackend {
    pub(crate) fn new(exam: Exam) -> Arc<Self> {
        Arc::new(Self {
            exam,
            eligibility: StdMutex::new(Eligibility {
                can_take: true,
                reason: None,
                has_active_attempt: false,
            }),
            resume_payload: StdMutex::new(None),
            submit_response: StdMutex::new(SubmitResponse { graded: false, result: None }),
            starts: StdMutex::new(Vec::new()),
            saves: StdMutex::new(Vec::new()),
            submits: StdMutex::new(Vec::new()),
            fail_saves: AtomicBool::new(false),
            fail_submits: AtomicBool::new(false),
            save_delay: StdMutex::new(None),
        })
    }

    pub(crate) fn deny(&self, reason: &str) {
        *self.eligibility.lock().unwrap() =
            Eligibility { can_take: false, reason: Some(reason.to_string()), has_active_attempt: false };
    }

    /// Report an unfinished attempt and serve `payload` from the resume endpoint.
    pub(crate) fn set_active_attempt(&self, payload: AttemptPayload) {
        self.eligibility.lock().unwrap().has_active_attempt = true;
        *self.resume_payload.lock().unwrap() = Some(payload);
    }

    pub(crate) fn set_submit_response(&self, response: SubmitResponse) {
        *self.submit_response.lock().unwrap() = response;
    }

    pub(crate) fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_submits(&self, fail: bool) {
        self.fail_submits.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn delay_saves(&self, delay: Duration) {
        *self.save_delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn save_count(&self) -> usize {
        self.saves.lock().unwrap().len()
    }

    pub(crate) fn submit_count(&self) -> usize {
        self.submits.lock().unwrap().len()
    }

    pub(crate) fn last_save(&self) -> Option<SaveProgressRequest> {
        self.saves.lock().unwrap().last().cloned()
    }

    pub(crate) fn last_submit(&self) -> Option<SubmitRequest> {
        self.submits.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ExamBackend for FakeBackend {
    async fn fetch_exam(&self, exam_id: &str) -> Result<Exam, BackendError> {
        if exam_id != self.exam.id {
            return Err(BackendError::Rejected {
                operation: "fetch_exam",
                status: 404,
                detail: "Exam not found".to_string(),
            });
        }
        Ok(self.exam.clone())
    }

    async fn check_eligibility(&self, _exam_id: &str) -> Result<Eligibility, BackendError> {
        Ok(self.eligibility.lock().unwrap().clone())
    }

    async fn active_attempt(&self, _exam_id: &str) -> Result<ActiveAttempt, BackendError> {
        let payload = self.resume_payload.lock().unwrap().clone();
        Ok(ActiveAttempt {
            has_active_attempt: payload.is_some(),
            response_id: payload.map(|payload| payload.response_id),
        })
    }

    async fn start_attempt(
        &self,
        _exam_id: &str,
        request: &StartAttemptRequest,
    ) -> Result<AttemptPayload, BackendError> {
        self.starts.lock().unwrap().push(request.clone());
        Ok(AttemptPayload { shuffle: Some(request.shuffle.clone()), ..fresh_payload(&self.exam) })
    }

    async fn resume_attempt(&self, _exam_id: &str) -> Result<AttemptPayload, BackendError> {
        self.resume_payload.lock().unwrap().clone().ok_or(BackendError::Rejected {
            operation: "resume_attempt",
            status: 404,
            detail: "No active attempt".to_string(),
        })
    }

    async fn save_progress(&self, request: &SaveProgressRequest) -> Result<SaveAck, BackendError> {
        let delay = *self.save_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(BackendError::Timeout { operation: "save_progress" });
        }
        self.saves.lock().unwrap().push(request.clone());
        Ok(SaveAck::default())
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse, BackendError> {
        if self.fail_submits.load(Ordering::SeqCst) {
            return Err(BackendError::Transient {
                operation: "submit",
                message: "connection reset".to_string(),
            });
        }
        self.submits.lock().unwrap().push(request.clone());
        Ok(self.submit_response.lock().unwrap().clone())
    }

    async fn attempt_history(&self, _exam_id: &str) -> Result<Vec<AttemptSummary>, BackendError> {
        Ok(Vec::new())
    }

    async fn fetch_results(&self, response_id: &str) -> Result<ExamResult, BackendError> {
        self.fetch_detailed_results(response_id).await
    }

    async fn fetch_detailed_results(&self, _response_id: &str) -> Result<ExamResult, BackendError> {
        self.submit_response.lock().unwrap().result.clone().ok_or(BackendError::Rejected {
            operation: "fetch_results",
            status: 404,
            detail: "Results not available".to_string(),
        })
    }
}
