// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Main runtime with Tokio: loads config, wires the mail source, ledger
//! client, notifier, and health reporter into the reconciliation engine,
//! and runs the polling supervisor until ctrl-c.

use core_types::AppConfig;
use ledger_client::{GraphqlLedgerClient, LedgerClient};
use log::{error, info};
use mail_source::{ImapMailSource, MailFilter, MailSource};
use notifier::{
    BotNotifier, HealthReporter, NoopHealthReporter, NoopNotifier, Notifier, PushHealthReporter,
};
use recon_engine::ReconEngine;
use std::sync::Arc;
use std::time::Duration;
use supervisor::PollingSupervisor;
use tokio::sync::watch;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run().await {
        error!("fatal: {}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), BoxError> {
    let config = AppConfig::load()?;

    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(config.ledger.request_timeout_secs))
        .build()?;

    let mail: Arc<dyn MailSource> = Arc::new(ImapMailSource::new(&config.mail));
    let ledger: Arc<dyn LedgerClient> =
        Arc::new(GraphqlLedgerClient::new(http.clone(), &config.ledger)?);

    let notifier: Arc<dyn Notifier> = match (&config.notify.bot_token, &config.notify.chat_id) {
        (Some(token), Some(chat_id)) => Arc::new(BotNotifier::new(
            http.clone(),
            &config.notify.api_base,
            token,
            chat_id.clone(),
        )?),
        _ => {
            info!("no operator channel configured, notifications disabled");
            Arc::new(NoopNotifier)
        }
    };
    let health: Arc<dyn HealthReporter> = match &config.health.push_url {
        Some(url) => Arc::new(PushHealthReporter::new(http.clone(), url)?),
        None => {
            info!("no health push url configured, liveness pings disabled");
            Arc::new(NoopHealthReporter)
        }
    };

    let engine = Arc::new(ReconEngine::new(
        mail,
        ledger,
        MailFilter::from_config(&config.mail),
        config.ledger.account.clone(),
        config.ledger.cards.iter().cloned().collect(),
        config.ledger.tags.clone(),
    ));

    let supervisor = PollingSupervisor::new(engine, notifier, health, &config.poll);
    let status = supervisor.status_handle();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = supervisor.spawn(shutdown_rx);

    tokio::signal::ctrl_c().await?;
    info!("ctrl-c received, stopping supervisor");
    shutdown_tx.send(true).ok();
    handle.await?;

    let snapshot = status.snapshot();
    info!(
        "stopped with status {:?} after {} cycle(s)",
        snapshot.overall,
        snapshot
            .gauges
            .iter()
            .find(|gauge| gauge.label == "cycles")
            .map(|gauge| gauge.value)
            .unwrap_or(0.0)
    );
    Ok(())
}
