mod cli;
mod ui;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use gradeflow::memory::{MemoryBackend, RosterAuthorizer};
use gradeflow::model::{
    AssessmentDefinition, AssignmentDefinition, Question, QuestionKind, SubmissionContent,
};
use gradeflow::scenario::{self, Scenario};
use gradeflow::{EngineConfig, SystemClock, TokioScheduler, WorkflowCoordinator};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref()).context("failed to load config")?;
    init_tracing(cli.verbose, &config.log_filter);

    match cli.command {
        Command::Demo { time_limit } => demo(config, time_limit).await,
        Command::Run { file } => {
            let scenario = Scenario::load(&file)?;
            let reports = scenario::replay(&scenario, config).await?;
            ui::print_reports(&reports);
            Ok(())
        }
    }
}

// --verbose wins over RUST_LOG, which wins over the config file.
fn init_tracing(verbose: bool, configured: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn demo(config: EngineConfig, time_limit: u64) -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_assessment(demo_quiz(time_limit));
    backend.add_assignment(AssignmentDefinition {
        id: "essay-1".into(),
        title: "Ensaio".into(),
        due_date: Utc::now() + chrono::Duration::days(7),
        total_points: 100.0,
    });

    let engine = WorkflowCoordinator::new(
        backend.clone(),
        backend.clone(),
        Arc::new(TokioScheduler::new()),
        Arc::new(SystemClock),
        config,
    )
    .with_authorizer(Arc::new(RosterAuthorizer::new(["prof"])));

    println!("Tentativa cronometrada ({time_limit}s)");
    let started = engine.start_attempt("demo-quiz", "ana").await?;
    ui::print_outcome("start attempt", &started);
    let attempt_id = started.entity.id;

    for (index, answer) in [(1, "4"), (2, "true"), (3, "Ownership moves values.")] {
        let out = engine.record_answer(attempt_id, index, answer).await?;
        ui::print_outcome(&format!("answer question {index}"), &out);
    }

    // The deadline timer closes the attempt; nobody presses submit.
    let countdown = ui::Countdown::start("aguardando o prazo");
    while let Some(left) = engine.get_time_remaining(attempt_id)? {
        if left == 0 && !engine.get_attempt(attempt_id)?.is_open() {
            break;
        }
        countdown.tick("tempo", left);
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    countdown.finish();

    let late = engine.submit_attempt(attempt_id).await?;
    ui::print_outcome("manual submit after timeout", &late);

    let scores = BTreeMap::from([(3, 8.0)]);
    match engine.grade_attempt("prof", attempt_id, &scores).await {
        Ok(graded) => {
            ui::print_outcome("grade essay question", &graded);
            ui::print_record("Attempt", &graded.entity);
        }
        Err(e) => ui::print_error("grade essay question", &e),
    }

    println!();
    println!("Entrega e revisão");
    let created = engine
        .create_submission("essay-1", "ana", SubmissionContent::text("Meu ensaio"))
        .await?;
    ui::print_outcome("create submission", &created);
    let submission_id = created.entity.id;

    let again = engine
        .create_submission("essay-1", "ana", SubmissionContent::text("Outra versão"))
        .await?;
    ui::print_outcome("create submission again", &again);

    if let Err(e) = engine.approve_submission("ana", submission_id, None).await {
        ui::print_error("self-approve", &e);
    }
    ui::print_outcome(
        "mark viewed",
        &engine.mark_viewed("prof", submission_id).await?,
    );
    ui::print_outcome(
        "grade 80",
        &engine
            .grade_submission("prof", submission_id, 80.0, Some("good".into()))
            .await?,
    );
    ui::print_outcome(
        "regrade 95",
        &engine
            .grade_submission("prof", submission_id, 95.0, Some("revised".into()))
            .await?,
    );
    let approved = engine
        .approve_submission("prof", submission_id, Some("Aprovado".into()))
        .await?;
    ui::print_outcome("approve", &approved);
    ui::print_record("Submission", &approved.entity);

    println!();
    println!("{} notificações emitidas", backend.events().len());
    Ok(())
}

fn demo_quiz(time_limit: u64) -> AssessmentDefinition {
    AssessmentDefinition {
        id: "demo-quiz".into(),
        title: "Quiz de demonstração".into(),
        questions: vec![
            Question {
                index: 1,
                prompt: "2 + 2 = ?".into(),
                points: 1.0,
                kind: QuestionKind::MultipleChoice {
                    options: vec!["3".into(), "4".into()],
                    correct: "4".into(),
                },
            },
            Question {
                index: 2,
                prompt: "Rust tem coletor de lixo?".into(),
                points: 1.0,
                kind: QuestionKind::TrueFalse { correct: false },
            },
            Question {
                index: 3,
                prompt: "Explique ownership.".into(),
                points: 8.0,
                kind: QuestionKind::Essay,
            },
        ],
        total_points: 10.0,
        time_limit_secs: Some(time_limit),
        attempts_allowed: Some(1),
        available_from: None,
        available_until: None,
        passing_score: 60.0,
    }
}
