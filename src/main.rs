use clap::Parser;
use lms_exam_client::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Err(e) = lms_exam_client::run(cli).await {
        eprintln!("lms-exam-client fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
