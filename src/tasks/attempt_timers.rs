use std::sync::Arc;

use tokio::sync::{watch, Notify};
use tokio::time::{interval_at, Duration, Instant};

use crate::services::attempt_engine::{ExamAttemptEngine, WeakEngine};

const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Disposal handle for one attempt's countdown and autosave loops.
///
/// Stopping (or dropping) the handle broadcasts shutdown; the loops also end on their own
/// once the attempt leaves IN_PROGRESS or the engine is gone.
pub(crate) struct AttemptTimers {
    shutdown: watch::Sender<bool>,
}

impl AttemptTimers {
    pub(crate) fn spawn(engine: &ExamAttemptEngine, timed: bool) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        if timed {
            tokio::spawn(tick_loop(engine.downgrade(), shutdown_rx.clone()));
        }
        tokio::spawn(autosave_loop(
            engine.downgrade(),
            engine.boundary(),
            engine.options().auto_save_interval,
            shutdown_rx,
        ));

        Self { shutdown: shutdown_tx }
    }

    pub(crate) fn stop(self) {
        drop(self);
    }

    /// True once every loop has exited and dropped its receiver.
    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        self.shutdown.is_closed()
    }
}

impl Drop for AttemptTimers {
    fn drop(&mut self) {
        if self.shutdown.send(true).is_err() {
            tracing::debug!("Attempt timers already stopped");
        }
    }
}

async fn tick_loop(engine: WeakEngine, mut shutdown: watch::Receiver<bool>) {
    let mut tick = interval_at(Instant::now() + TICK_PERIOD, TICK_PERIOD);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {}
        }
        if *shutdown.borrow() {
            break;
        }

        let Some(engine) = engine.upgrade() else { break };
        if !engine.on_tick().await {
            break;
        }
    }
    tracing::debug!("Attempt tick loop stopped");
}

async fn autosave_loop(
    engine: WeakEngine,
    boundary: Arc<Notify>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {}
            _ = boundary.notified() => {}
        }
        if *shutdown.borrow() {
            break;
        }

        let Some(engine) = engine.upgrade() else { break };
        if !engine.on_autosave().await {
            break;
        }
    }
    tracing::debug!("Attempt autosave loop stopped");
}
