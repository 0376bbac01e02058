pub(crate) mod attempt_timers;
