use time::OffsetDateTime;

use crate::schemas::exam::Exam;

/// Server-reported duration wins; the exam's own minutes are the fallback.
pub(crate) fn resolve_duration_seconds(exam: &Exam, reported: Option<u64>) -> u64 {
    reported.filter(|seconds| *seconds > 0).unwrap_or_else(|| exam.duration_seconds())
}

/// Remaining time derives from the server's elapsed counter, never from a local clock.
pub(crate) fn remaining_seconds(duration_seconds: u64, elapsed_seconds: u64) -> u64 {
    duration_seconds.saturating_sub(elapsed_seconds)
}

pub(crate) fn seconds_between(from: OffsetDateTime, to: OffsetDateTime) -> u64 {
    let whole = (to - from).whole_seconds();
    if whole < 0 {
        0
    } else {
        whole as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use time::Duration;

    #[test]
    fn reported_duration_overrides_exam_minutes() {
        let exam = test_support::single_choice_exam();
        assert_eq!(resolve_duration_seconds(&exam, Some(300)), 300);
        assert_eq!(resolve_duration_seconds(&exam, Some(0)), 600);
        assert_eq!(resolve_duration_seconds(&exam, None), 600);
    }

    #[test]
    fn remaining_saturates_at_zero() {
        assert_eq!(remaining_seconds(600, 120), 480);
        assert_eq!(remaining_seconds(600, 600), 0);
        assert_eq!(remaining_seconds(600, 9_000), 0);
    }

    #[test]
    fn seconds_between_clamps_clock_skew() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(seconds_between(now, now + Duration::seconds(42)), 42);
        assert_eq!(seconds_between(now + Duration::seconds(5), now), 0);
    }
}
