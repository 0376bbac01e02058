//! The exam-attempt aggregate: shuffle layout, answers, flags, navigation and countdown.
//!
//! Everything here is synchronous and side-effect free apart from the aggregate itself;
//! the async engine in `services::attempt_engine` owns network calls and timers.

mod commands;
mod queries;
mod review;
mod shuffle;
mod timing;
mod types;


pub use queries::{DisplayQuestion, Progress, QuestionStatus, Validation};
pub use review::{review_answer, AnswerReview, ScorePreview};
pub use shuffle::{OptionShuffle, ShuffleLayout};
pub use types::{Answer, AttemptStatus, ExamAttempt, Rejection, TickOutcome};
