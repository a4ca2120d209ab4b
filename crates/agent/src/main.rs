mod config;
mod engine;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use groupcall_core::ConferenceDescription;
use groupcall_sfu_client::{
    ConferenceApi, GroupCallSession, HttpBridgeClient, NegotiationConfig, NegotiationState,
};
use tokio::{signal, sync::watch};
use tracing::{error, info};
use tracing_subscriber::fmt::writer::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use crate::{
    config::{AgentConfig, CliOverrides, LogFormat},
    engine::SdpDumpEngine,
};

const DEFAULT_LOG_FILTER: &str =
    "info,groupcall_agent=info,groupcall_core=info,groupcall_sfu_client=info";

#[derive(Parser, Debug, Default)]
#[command(
    name = "groupcall-agent",
    version,
    about = "Colibri bridge inspector and group-call negotiation agent"
)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Args, Debug, Default, Clone)]
struct ConfigArgs {
    #[arg(long)]
    bridge_url: Option<String>,
    #[arg(long)]
    public_host: Option<String>,
    #[arg(long)]
    request_timeout_ms: Option<u64>,
    #[arg(long)]
    poll_interval_ms: Option<u64>,
    #[arg(long)]
    log_format: Option<LogFormat>,
}

impl ConfigArgs {
    fn into_overrides(self) -> CliOverrides {
        CliOverrides {
            bridge_url: self.bridge_url,
            public_host: self.public_host,
            request_timeout_ms: self.request_timeout_ms,
            poll_interval_ms: self.poll_interval_ms,
            log_format: self.log_format,
        }
    }
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// List the conferences currently hosted by the bridge.
    List,
    /// Print one conference as JSON.
    Show(ShowCommand),
    /// Join the first conference (creating one if needed) and negotiate audio.
    Join(JoinCommand),
}

#[derive(Args, Debug)]
struct ShowCommand {
    /// Conference identifier assigned by the bridge.
    #[arg(long)]
    id: String,
}

#[derive(Args, Debug, Default)]
struct JoinCommand {
    /// Directory receiving numbered offer files; offers go to stdout otherwise.
    #[arg(long)]
    offer_dir: Option<PathBuf>,
    /// SDP answer to relay once the first offer has been produced.
    #[arg(long)]
    answer_file: Option<PathBuf>,
    /// Fixed SDP session id instead of a random one.
    #[arg(long)]
    session_id: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let overrides = cli.config.clone().into_overrides();
    let mut config = AgentConfig::load()?;
    config.apply_overrides(&overrides)?;
    init_tracing(&config);

    let client = HttpBridgeClient::new(&config.bridge_url, config.request_timeout())?;
    match cli
        .command
        .unwrap_or_else(|| CliCommand::Join(JoinCommand::default()))
    {
        CliCommand::List => {
            let conferences = client.list_conferences().await?;
            print!("{}", summarize(&conferences));
            Ok(())
        }
        CliCommand::Show(cmd) => {
            let conference = client.get_conference(&cmd.id).await?;
            println!("{}", serde_json::to_string_pretty(&conference.to_json()?)?);
            Ok(())
        }
        CliCommand::Join(cmd) => join(&config, client, cmd).await,
    }
}

fn summarize(conferences: &[ConferenceDescription]) -> String {
    if conferences.is_empty() {
        return "no conferences\n".to_string();
    }
    conferences
        .iter()
        .map(|conference| {
            let endpoints: Vec<&str> = conference
                .channels()
                .map(|channel| channel.endpoint.as_str())
                .collect();
            format!(
                "{}\t{} channel(s)\t{}\n",
                conference.id,
                endpoints.len(),
                endpoints.join(",")
            )
        })
        .collect()
}

async fn join(config: &AgentConfig, client: HttpBridgeClient, cmd: JoinCommand) -> Result<()> {
    let mut negotiation =
        NegotiationConfig::new(config.public_host()?).with_poll_interval(config.poll_interval());
    if let Some(session_id) = cmd.session_id {
        negotiation = negotiation.with_session_id(session_id);
    }
    info!(
        bridge_url = %config.bridge_url,
        bridge_host = %negotiation.bridge_host,
        session_id = negotiation.session_id,
        "joining group call"
    );

    let engine = Arc::new(
        SdpDumpEngine::new(cmd.offer_dir.clone()).context("failed to prepare offer directory")?,
    );
    let (audio_active, audio_rx) = watch::channel(false);
    let session = GroupCallSession::start(negotiation, Arc::new(client), engine.clone(), audio_rx);
    let mut state = session.state();
    let mut members = session.member_count();
    audio_active.send_replace(true);

    let mut pending_answer = cmd.answer_file;
    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                info!(state = %current, "negotiation state changed");
                if current == NegotiationState::Terminated {
                    break;
                }
                if current == NegotiationState::Negotiating {
                    if let Some(path) = pending_answer.take() {
                        let sdp = tokio::fs::read_to_string(&path)
                            .await
                            .with_context(|| format!("failed to read answer {}", path.display()))?;
                        session.answer_sink().deliver(sdp)?;
                    }
                }
            }
            changed = members.changed() => {
                if changed.is_err() {
                    break;
                }
                info!(members = *members.borrow_and_update(), "participant count changed");
            }
            _ = shutdown_signal() => break,
        }
    }

    session.shutdown().await;
    info!(offers = engine.offers_written(), "left group call");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!(?e, "failed to install Ctrl+C handler");
    }
    info!("shutdown signal received");
}

fn init_tracing(config: &AgentConfig) {
    // Respect RUST_LOG if set, otherwise default to info for our crates.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let json = matches!(config.log_format(), LogFormat::Json);
    let subscriber = build_subscriber(json, env_filter);

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install tracing subscriber: {err}");
    }
}

#[cfg(test)]
fn build_subscriber_with_writer<W>(
    json: bool,
    env_filter: EnvFilter,
    writer: W,
) -> Box<dyn tracing::Subscriber + Send + Sync>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + Clone + 'static,
{
    build_subscriber_inner(json, env_filter, writer)
}

fn build_subscriber(
    json: bool,
    env_filter: EnvFilter,
) -> Box<dyn tracing::Subscriber + Send + Sync> {
    build_subscriber_inner(json, env_filter, std::io::stderr)
}

fn build_subscriber_inner<W>(
    json: bool,
    env_filter: EnvFilter,
    make_writer: W,
) -> Box<dyn tracing::Subscriber + Send + Sync>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + Clone + 'static,
{
    if json {
        Box::new(
            tracing_subscriber::registry().with(env_filter).with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(make_writer),
            ),
        )
    } else {
        Box::new(
            tracing_subscriber::registry().with(env_filter).with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(make_writer),
            ),
        )
    }
}
