use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use dialectus_client::config::ClientConfig;
use dialectus_client::orchestrator::{
    DebateOrchestrator, DebateSetup, HttpDebateService, SessionError, SessionUpdate,
};
use dialectus_client::persistence::SqlitePersistence;
use dialectus_client::session::{DebateReport, DebateSessionManager};
use dialectus_client::telemetry::init_tracing;

const SETUP_ENV: &str = "DIALECTUS_SETUP";
const DEFAULT_LIST_LIMIT: usize = 20;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ClientConfig::from_env()?;
    let _guard = init_tracing(&config.log_level, config.log_dir.as_deref())?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("list") => {
            let limit = match args.get(1) {
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("invalid list limit `{raw}`"))?,
                None => DEFAULT_LIST_LIMIT,
            };
            list_debates(&config, limit).await
        }
        Some("models") => list_models(&config).await,
        Some(path) => run_debate(&config, PathBuf::from(path)).await,
        None => match std::env::var(SETUP_ENV) {
            Ok(path) if !path.is_empty() => run_debate(&config, PathBuf::from(path)).await,
            _ => bail!("usage: dialectus-client <setup.json> | list [N] | models"),
        },
    }
}

fn orchestrator(config: &ClientConfig) -> DebateOrchestrator {
    let session = config.session_config();
    let request_timeout = session
        .request_timeout_local
        .max(session.request_timeout_remote);
    let service = HttpDebateService::new(
        config.api_base_url.clone(),
        request_timeout,
        config.websocket_timeout(),
    );
    DebateOrchestrator::new(session, Arc::new(service))
}

async fn open_store(config: &ClientConfig) -> Result<SqlitePersistence> {
    let sqlite = config.sqlite_config();
    tokio::task::spawn_blocking(move || SqlitePersistence::bootstrap(sqlite))
        .await
        .context("storage bootstrap task failed")?
}

async fn run_debate(config: &ClientConfig, setup_path: PathBuf) -> Result<()> {
    let raw = tokio::fs::read_to_string(&setup_path)
        .await
        .with_context(|| format!("failed to read debate setup {}", setup_path.display()))?;
    let setup: DebateSetup = serde_json::from_str(&raw)
        .with_context(|| format!("invalid debate setup {}", setup_path.display()))?;

    let store = open_store(config).await?;
    let manager = DebateSessionManager::new(orchestrator(config), Arc::new(store))
        .with_suspect_policy(config.suspect_policy());

    let handle = manager.start(&setup).await?;
    let updates = tokio::spawn(log_updates(handle.subscribe()));
    let canceller = handle.canceller();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(target: "dialectus_client", "interrupt received, cancelling debate");
            canceller.cancel().await;
        }
    });

    let result = manager.complete(handle).await;
    interrupt.abort();
    updates.abort();

    let report = match result {
        Ok(report) => report,
        Err(SessionError::PersistenceFailed {
            session_id,
            transcript,
            source,
        }) => {
            warn!(
                target: "dialectus_client",
                %session_id,
                error = %source,
                "save failed, retrying once"
            );
            manager.retry_persist(*transcript).await?
        }
        Err(err) => return Err(anyhow!(err)),
    };

    log_report(&report);
    Ok(())
}

async fn log_updates(mut updates: tokio::sync::broadcast::Receiver<SessionUpdate>) {
    loop {
        match updates.recv().await {
            Ok(SessionUpdate::TurnCompleted(turn)) => info!(
                target: "dialectus_client",
                speaker = %turn.speaker_id,
                position = turn.position.as_str(),
                stage = %turn.stage(),
                words = turn.word_count,
                "{}",
                turn.content
            ),
            Ok(SessionUpdate::StageAdvanced { to, .. }) => {
                info!(target: "dialectus_client", stage = %to, "next stage")
            }
            Ok(SessionUpdate::JudgeDecisionReceived {
                judge_model,
                winner_id,
            }) => info!(
                target: "dialectus_client",
                %judge_model,
                winner = winner_id.as_deref().unwrap_or("none"),
                "judge decided"
            ),
            Ok(SessionUpdate::ProtocolViolation(violation)) => {
                warn!(target: "dialectus_client", %violation, "turn out of order")
            }
            Ok(SessionUpdate::Terminated(termination)) => {
                info!(
                    target: "dialectus_client",
                    termination = termination.as_str(),
                    "debate stream ended"
                );
                break;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(target: "dialectus_client", skipped, "live view fell behind")
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn log_report(report: &DebateReport) {
    match &report.ensemble {
        Some(ensemble) => info!(
            target: "dialectus_client",
            debate_id = report.debate_id,
            winner = %ensemble.final_winner_id,
            margin = ensemble.final_margin,
            consensus = ensemble.consensus_level(),
            method = ensemble.method.as_str(),
            "debate saved"
        ),
        None => info!(
            target: "dialectus_client",
            debate_id = report.debate_id,
            partial = report.is_partial(),
            final_phase = %report.final_phase,
            termination = %report.termination,
            "debate saved without a verdict"
        ),
    }
}

async fn list_debates(config: &ClientConfig, limit: usize) -> Result<()> {
    let store = open_store(config).await?;
    let debates = tokio::task::spawn_blocking(move || store.list_debates(Some(limit)))
        .await
        .context("listing task failed")??;

    if debates.is_empty() {
        info!(target: "dialectus_client", "no saved debates");
    }
    for debate in debates {
        info!(
            target: "dialectus_client",
            id = debate.id,
            format = %debate.format,
            final_phase = %debate.final_phase,
            messages = debate.message_count,
            saved_at = %debate.saved_at,
            "{}",
            debate.topic
        );
    }
    Ok(())
}

async fn list_models(config: &ClientConfig) -> Result<()> {
    match orchestrator(config).list_models().await {
        Ok(models) => {
            for model in models {
                info!(target: "dialectus_client", %model, "available model");
            }
            Ok(())
        }
        Err(err) => {
            error!(target: "dialectus_client", error = %err, "model listing failed");
            Err(err)
        }
    }
}
