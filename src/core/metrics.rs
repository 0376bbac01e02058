use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    Ok(())
}

/// Text exposition of everything recorded so far, if the recorder is installed.
pub fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

pub(crate) fn record_autosave(outcome: &'static str) {
    metrics::counter!("exam_autosave_total", "outcome" => outcome).increment(1);
}

pub(crate) fn record_submit(outcome: &'static str) {
    metrics::counter!("exam_submit_total", "outcome" => outcome).increment(1);
}

pub(crate) fn record_backend_request(operation: &'static str, seconds: f64) {
    metrics::histogram!("exam_backend_request_seconds", "operation" => operation).record(seconds);
}
