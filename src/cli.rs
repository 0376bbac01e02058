use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::time::{sleep, timeout, Duration};

use crate::attempt::{Answer, ExamAttempt};
use crate::core::config::Settings;
use crate::core::shutdown;
use crate::services::attempt_engine::{EngineOptions, ExamAttemptEngine};
use crate::services::backend::ExamBackend;
use crate::services::http_backend::HttpExamBackend;

const FINAL_SAVE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(version, about = "Take exams against an LMS backend from the terminal", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start (or resume) an attempt and keep it open until submitted or interrupted
    Take {
        exam_id: String,
        /// JSON object of question id to answer; choices use the original option index
        #[arg(short, long)]
        answers: Option<PathBuf>,
        /// Resume the unfinished attempt instead of starting a new one
        #[arg(long)]
        resume: bool,
        /// Submit right after applying the answers
        #[arg(long)]
        submit: bool,
    },
    /// Print the results of a submitted attempt
    Results {
        response_id: String,
        #[arg(long)]
        detailed: bool,
    },
    /// List previous attempts for an exam
    History { exam_id: String },
}

pub async fn execute(cli: Cli, settings: &Settings) -> Result<()> {
    let backend = Arc::new(HttpExamBackend::from_settings(settings)?);

    match cli.command {
        Command::Take { exam_id, answers, resume, submit } => {
            let engine = ExamAttemptEngine::new(backend, EngineOptions::from_settings(settings));
            take(&engine, &exam_id, answers.as_deref(), resume, submit).await
        }
        Command::Results { response_id, detailed } => {
            let result = if detailed {
                backend.fetch_detailed_results(&response_id).await
            } else {
                backend.fetch_results(&response_id).await
            }
            .with_context(|| format!("Failed to fetch results for {response_id}"))?;
            print_json(&result)
        }
        Command::History { exam_id } => {
            let engine = ExamAttemptEngine::new(backend, EngineOptions::from_settings(settings));
            let attempts = engine
                .attempt_history(&exam_id)
                .await
                .with_context(|| format!("Failed to list attempts for {exam_id}"))?;
            print_json(&attempts)
        }
    }
}

async fn take(
    engine: &ExamAttemptEngine,
    exam_id: &str,
    answers: Option<&Path>,
    resume: bool,
    submit: bool,
) -> Result<()> {
    let opened = if resume {
        engine.resume_exam_attempt(exam_id).await
    } else {
        engine.start_exam(exam_id).await
    };
    opened.with_context(|| format!("Failed to open an attempt for exam {exam_id}"))?;

    if let Some(path) = answers {
        let answers = load_answers(path)?;
        let attempt = engine.attempt().context("attempt disappeared after start")?;
        for (question_id, answer) in displayed_answers(&attempt, answers) {
            if let Err(reason) = engine.update_answer(&question_id, answer) {
                tracing::warn!(question_id = %question_id, reason = %reason, "Answer not applied");
            }
        }
    }

    if submit {
        let response = engine.submit_exam().await.context("Failed to submit attempt")?;
        print_json(&engine.view())?;
        if let Some(result) = response.result {
            print_json(&result)?;
        }
        return Ok(());
    }

    print_json(&engine.view())?;
    wait_for_exit(engine).await;
    if let Some(snapshot) = crate::core::metrics::render() {
        eprintln!("{snapshot}");
    }
    Ok(())
}

/// Keeps the attempt open until the process is interrupted or the attempt ends on its own.
async fn wait_for_exit(engine: &ExamAttemptEngine) {
    let exit = shutdown::exit_signal();
    tokio::pin!(exit);

    loop {
        tokio::select! {
            _ = &mut exit => break,
            _ = sleep(Duration::from_secs(1)) => {
                if engine.status().is_final() {
                    tracing::info!(status = engine.status().as_str(), "Attempt finished");
                    return;
                }
            }
        }
    }

    match timeout(FINAL_SAVE_TIMEOUT, engine.close()).await {
        Ok(Ok(Ok(outcome))) => tracing::info!(outcome = ?outcome, "Final save completed"),
        Ok(Ok(Err(err))) => tracing::warn!(error = %err, "Final save failed"),
        Ok(Err(err)) => tracing::error!(error = %err, "Final save task panicked"),
        Err(_) => tracing::warn!("Final save did not finish in time"),
    }
}

fn load_answers(path: &Path) -> Result<BTreeMap<String, Answer>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read answers from {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid answers file {}", path.display()))
}

/// Translates original option indices into the attempt's displayed indices.
fn displayed_answers(
    attempt: &ExamAttempt,
    answers: BTreeMap<String, Answer>,
) -> Vec<(String, Answer)> {
    answers
        .into_iter()
        .map(|(question_id, answer)| {
            let answer = match (answer, attempt.layout().option_shuffle(&question_id)) {
                (Answer::Choice(original), Some(shuffle)) => {
                    Answer::Choice(shuffle.displayed_index(original).unwrap_or(original))
                }
                (answer, _) => answer,
            };
            (question_id, answer)
        })
        .collect()
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
