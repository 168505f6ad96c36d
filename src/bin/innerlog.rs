use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use innerlog::config::AppConfig;
use innerlog::gateway::OpenAiGateway;
use innerlog::models::{TaskStatus, TaskUsefulness};
use innerlog::reconcile::SessionFeedback;
use innerlog::session::{SessionController, SessionState};
use innerlog::store::SqliteStore;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,innerlog=debug")),
        )
        .init();

    let config = AppConfig::load();
    let store = Arc::new(
        SqliteStore::new(config.database_path()).context("failed to open journal database")?,
    );
    let gateway = Arc::new(OpenAiGateway::from_config(&config));

    tracing::info!(
        "innerlog starting (model {}, db {:?})",
        config.llm_model,
        config.database_path()
    );

    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    runtime.block_on(run(SessionController::new(gateway, store, &config)))
}

async fn run(mut controller: SessionController) -> Result<()> {
    print_last_message(&controller);
    println!("(/end to finish, /save [summary], /rate <n> <done|skip> [low|medium|high], /dismiss, /portrait, /clear, /quit)");

    let mut feedback = SessionFeedback::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_whitespace().next() {
            Some("/quit") => break,
            Some("/end") => {
                controller.end_session().await?;
                feedback = SessionFeedback::default();
                println!("--- session summary ---");
                println!("{}", controller.session_summary());
                for (i, task) in controller.suggested_tasks().iter().enumerate() {
                    match &task.details {
                        Some(details) => println!("  [{i}] {} — {details}", task.title),
                        None => println!("  [{i}] {}", task.title),
                    }
                }
            }
            Some("/rate") => {
                if let Some(rated) = parse_rating(line, &controller) {
                    feedback.task_feedback.retain(|t| t.id != rated.id);
                    println!("rated: {} ({})", rated.title, rated.status.as_db_str());
                    feedback.task_feedback.push(rated);
                } else {
                    println!("usage: /rate <n> <done|skip> [low|medium|high]");
                }
            }
            Some("/save") => {
                feedback.edited_summary = line
                    .strip_prefix("/save")
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                match controller.confirm_summary(std::mem::take(&mut feedback)) {
                    Ok(outcome) => {
                        if let Some(preview) = &outcome.highlights.summary_preview {
                            println!("portrait updated: {preview}");
                        }
                        for strategy in &outcome.highlights.new_strategies {
                            println!("  + strategy: {strategy}");
                        }
                        controller.start_new_session();
                        print_last_message(&controller);
                    }
                    Err(error) => println!("{error}"),
                }
            }
            Some("/dismiss") => {
                controller.dismiss_summary();
                controller.start_new_session();
                print_last_message(&controller);
            }
            Some("/portrait") => {
                let portrait = controller.portrait();
                println!("summary: {}", portrait.summary);
                println!("focus areas: {:?}", portrait.focus_areas);
                println!("strategies: {:?}", portrait.helpful_strategies);
                println!("weights: {:?}", portrait.preference_weights);
            }
            Some("/clear") => {
                controller.clear_portrait()?;
                println!("portrait cleared");
                print_last_message(&controller);
            }
            _ => {
                if controller.state() != SessionState::Active {
                    println!("no active session; /save or /dismiss first");
                    continue;
                }
                controller.send_message(line).await?;
                print_last_message(&controller);
            }
        }
    }
    Ok(())
}

fn print_last_message(controller: &SessionController) {
    if let Some(message) = controller.messages().last() {
        println!("> {}", message.text);
    }
}

fn parse_rating(line: &str, controller: &SessionController) -> Option<innerlog::ActionTask> {
    let mut parts = line.split_whitespace().skip(1);
    let index: usize = parts.next()?.parse().ok()?;
    let mut task = controller.suggested_tasks().get(index)?.clone();
    task.status = match parts.next()? {
        "done" => TaskStatus::Done,
        "skip" => TaskStatus::Skipped,
        _ => return None,
    };
    task.usefulness = match parts.next() {
        Some(raw) => TaskUsefulness::from_db(raw),
        None => TaskUsefulness::NotSet,
    };
    Some(task)
}
