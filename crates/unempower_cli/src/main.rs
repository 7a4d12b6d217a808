//! unempower CLI: index, poll, serve, offer, train-model, hashes.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{info, warn};
use unempower::attest::{AttestedTerms, CreditAttestation, TypedDataHashes};
use unempower::chain::fallback::DEFAULT_LOOKBACK_BLOCKS;
use unempower::chain::normalize::{normalize_address, parse_address};
use unempower::config::{ApiConfig, IndexerSettings, Settings, SignerConfig};
use unempower::scoring::model::TRAINING_SEED;
use unempower::{
    ChainFallback, ChainIndexer, CreditModel, CreditPipeline, EventStore, RpcClient, RpcConfig,
};
use unempower_api::AppState;

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

fn main() -> CliResult {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();
    let cli = Cli::parse();
    match cli.command {
        Command::Index(args) => run_index(args),
        Command::Poll(args) => run_poll(args),
        Command::Serve(args) => run_serve(args),
        Command::Offer(args) => run_offer(args),
        Command::TrainModel(args) => run_train_model(args),
        Command::Hashes(args) => run_hashes(args),
    }
}

#[derive(Parser)]
#[command(name = "unempower")]
#[command(author = "gorusys <goru.connector@outlook.com>")]
#[command(about = "Work-proof indexing, credit scoring and signed credit attestations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Follow the chain and store WorkProof/LoanVault events until Ctrl-C.
    Index(IndexArgs),
    /// Index one inclusive block range and print the report.
    Poll(PollArgs),
    /// Run the HTTP API with the indexer alongside.
    Serve(ServeArgs),
    /// Compute and sign an offer for one worker and print it.
    Offer(OfferArgs),
    /// Train the credit model and write it to the model path.
    TrainModel(TrainArgs),
    /// Print EIP-712 hashes of the sample attestation for a worker.
    Hashes(HashesArgs),
}

#[derive(Args, Clone)]
struct ChainArgs {
    #[arg(long, env = "RPC_URL", default_value = "http://127.0.0.1:8545")]
    rpc_url: String,
    #[arg(long, env = "CHAIN_ID", default_value_t = 31337)]
    chain_id: u64,
    #[arg(long, env = "WORKPROOF_ADDRESS", default_value = "")]
    workproof_address: String,
    #[arg(long, env = "LOAN_VAULT_ADDRESS", default_value = "")]
    loan_vault_address: String,
    #[arg(long, env = "DATABASE_PATH", default_value = "data/unempower.db")]
    database_path: PathBuf,
    #[arg(long, env = "INDEXER_POLL_INTERVAL", default_value_t = 3)]
    poll_interval_secs: u64,
    #[arg(long, env = "INDEXER_START_BLOCK", default_value_t = 0)]
    start_block: u64,
    #[arg(long, env = "INDEXER_CHUNK_SIZE", default_value_t = 100)]
    chunk_size: u64,
    /// Blocks searched for a worker's proofs when the store has none.
    #[arg(
        long = "fallback-lookback",
        env = "FALLBACK_LOOKBACK_BLOCKS",
        default_value_t = DEFAULT_LOOKBACK_BLOCKS
    )]
    fallback_lookback_blocks: u64,
}

#[derive(Args, Clone)]
struct SignerArgs {
    #[arg(long, env = "ATTESTATION_VERIFIER_ADDRESS", default_value = "")]
    verifier_address: String,
    #[arg(long, env = "AI_SIGNER_PRIVATE_KEY", hide_env_values = true)]
    signer_key: Option<String>,
    #[arg(long, env = "ATTESTATION_TTL_SECS", default_value_t = 900)]
    ttl_secs: u64,
    #[arg(long, env = "MODEL_PATH", default_value = "data/credit_model.json")]
    model_path: PathBuf,
}

#[derive(Args)]
struct IndexArgs {
    #[command(flatten)]
    chain: ChainArgs,
}

#[derive(Args)]
struct PollArgs {
    #[command(flatten)]
    chain: ChainArgs,
    #[arg(long)]
    from: u64,
    #[arg(long)]
    to: u64,
}

#[derive(Args)]
struct ServeArgs {
    #[command(flatten)]
    chain: ChainArgs,
    #[command(flatten)]
    signer: SignerArgs,
    #[arg(long, env = "API_BIND", default_value = "127.0.0.1:8000")]
    bind: String,
    /// Comma-separated allowed origins; empty allows any.
    #[arg(long, env = "CORS_ORIGINS", default_value = "")]
    cors_origins: String,
    #[arg(long, env = "ADMIN_TOKEN", hide_env_values = true)]
    admin_token: Option<String>,
    /// Serve from the existing store without following the chain.
    #[arg(long)]
    no_indexer: bool,
}

#[derive(Args)]
struct OfferArgs {
    #[command(flatten)]
    chain: ChainArgs,
    #[command(flatten)]
    signer: SignerArgs,
    #[arg(long)]
    worker: String,
    /// Skip the live-chain lookup when the store has no proofs.
    #[arg(long)]
    no_fallback: bool,
}

#[derive(Args)]
struct TrainArgs {
    #[arg(long, env = "MODEL_PATH", default_value = "data/credit_model.json")]
    out: PathBuf,
    #[arg(long, default_value_t = TRAINING_SEED)]
    seed: u64,
}

#[derive(Args)]
struct HashesArgs {
    #[arg(long, env = "CHAIN_ID", default_value_t = 31337)]
    chain_id: u64,
    #[arg(long, env = "ATTESTATION_VERIFIER_ADDRESS")]
    verifier_address: String,
    #[arg(long)]
    worker: String,
    #[arg(long)]
    nonce: Option<u64>,
    #[arg(long, default_value_t = 0)]
    issued_at: u64,
}

fn settings(chain: &ChainArgs, signer: Option<&SignerArgs>) -> Settings {
    let mut s = Settings {
        rpc: RpcConfig {
            url: chain.rpc_url.clone(),
            ..RpcConfig::default()
        },
        chain_id: chain.chain_id,
        workproof_address: chain.workproof_address.clone(),
        loan_vault_address: chain.loan_vault_address.clone(),
        indexer: IndexerSettings {
            chunk_size: chain.chunk_size,
            poll_interval_secs: chain.poll_interval_secs,
            start_block: chain.start_block,
        },
        database_path: chain.database_path.clone(),
        fallback_lookback_blocks: chain.fallback_lookback_blocks,
        ..Settings::default()
    };
    if let Some(sa) = signer {
        s.signer = SignerConfig {
            private_key: sa.signer_key.clone(),
            verifying_contract: sa.verifier_address.clone(),
            ttl_secs: sa.ttl_secs,
        };
        s.model_path = sa.model_path.clone();
    }
    s
}

fn open_store(settings: &Settings) -> CliResult<Arc<EventStore>> {
    let store = EventStore::open(&settings.database_path)?;
    info!(path = %settings.database_path.display(), "store opened");
    Ok(Arc::new(store))
}

fn indexer(
    settings: &Settings,
    source: Arc<RpcClient>,
    store: Arc<EventStore>,
) -> CliResult<ChainIndexer<Arc<RpcClient>>> {
    Ok(ChainIndexer::new(source, store, settings.indexer_config())?)
}

fn pipeline(settings: &Settings, store: Arc<EventStore>) -> CliResult<CreditPipeline> {
    let signer = settings.signer()?;
    let model = CreditModel::load_or_train(&settings.model_path)?;
    info!(
        signer = %signer.address_checksum(),
        accuracy = model.training_accuracy,
        "credit model ready"
    );
    Ok(CreditPipeline::new(
        store,
        Arc::new(model),
        Arc::new(signer),
        settings.signer.ttl_secs,
    ))
}

fn ctrl_c_to(tx: watch::Sender<bool>) -> impl std::future::Future<Output = ()> + Send + 'static {
    async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler failed");
        }
        info!("shutdown requested");
        let _ = tx.send(true);
    }
}

fn run_index(args: IndexArgs) -> CliResult {
    let settings = settings(&args.chain, None);
    settings.validate()?;
    let store = open_store(&settings)?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let source = Arc::new(RpcClient::new(settings.rpc.clone())?);
        let idx = indexer(&settings, Arc::clone(&source), store)?;
        let (tx, rx) = watch::channel(false);
        tokio::spawn(ctrl_c_to(tx));
        idx.run(rx).await;
        info!(requests = source.request_count(), "index complete");
        CliResult::Ok(())
    })
}

fn run_poll(args: PollArgs) -> CliResult {
    let settings = settings(&args.chain, None);
    settings.validate()?;
    let store = open_store(&settings)?;
    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let source = Arc::new(RpcClient::new(settings.rpc.clone())?);
        let idx = indexer(&settings, Arc::clone(&source), Arc::clone(&store))?;
        let report = idx.poll_once(args.from, args.to).await?;
        info!(requests = source.request_count(), "poll complete");
        CliResult::Ok(report)
    })?;
    for err in &report.decode_errors {
        warn!(error = %err, "skipped log");
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_serve(args: ServeArgs) -> CliResult {
    let mut settings = settings(&args.chain, Some(&args.signer));
    settings.api = ApiConfig {
        bind: args.bind.clone(),
        cors_origins: args
            .cors_origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect(),
        admin_token: args.admin_token.clone(),
        ..ApiConfig::default()
    };
    settings.validate()?;
    let store = open_store(&settings)?;
    // Refuse to boot without a usable model or key.
    let pipeline = pipeline(&settings, Arc::clone(&store))?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let source = Arc::new(RpcClient::new(settings.rpc.clone())?);
        let fallback = ChainFallback {
            source: Arc::clone(&source),
            workproof_address: settings.workproof_address.clone(),
            lookback_blocks: settings.fallback_lookback_blocks,
        };
        let state = AppState::new(pipeline, Some(fallback), settings.chain_id, &settings.api);

        let (tx, rx) = watch::channel(false);
        let indexer_task = if args.no_indexer {
            None
        } else {
            let idx = indexer(&settings, source, store)?;
            Some(tokio::spawn(async move { idx.run(rx).await }))
        };

        unempower_api::serve(state, &settings.api, ctrl_c_to(tx)).await?;
        if let Some(task) = indexer_task {
            if let Err(e) = task.await {
                warn!(error = %e, "indexer task ended abnormally");
            }
        }
        info!("stopped");
        CliResult::Ok(())
    })
}

fn run_offer(args: OfferArgs) -> CliResult {
    let settings = settings(&args.chain, Some(&args.signer));
    settings.validate()?;
    let worker = parse_address(&args.worker)?;
    let worker_lower = normalize_address(&args.worker)?;
    let store = open_store(&settings)?;
    let pipeline = pipeline(&settings, store)?;

    let rt = tokio::runtime::Runtime::new()?;
    let history = rt.block_on(async {
        let fallback = if args.no_fallback {
            None
        } else {
            Some(ChainFallback {
                source: Arc::new(RpcClient::new(settings.rpc.clone())?),
                workproof_address: settings.workproof_address.clone(),
                lookback_blocks: settings.fallback_lookback_blocks,
            })
        };
        CliResult::Ok(pipeline.history(&worker_lower, fallback.as_ref()).await)
    })?;
    let resp = pipeline.offer(worker, &history, OffsetDateTime::now_utc().unix_timestamp())?;
    println!("{}", serde_json::to_string_pretty(&resp)?);
    Ok(())
}

fn run_train_model(args: TrainArgs) -> CliResult {
    let model = CreditModel::train(args.seed)?;
    model.save(&args.out)?;
    info!(
        path = %args.out.display(),
        samples = model.samples,
        accuracy = model.training_accuracy,
        "model trained"
    );
    println!("{}", serde_json::to_string_pretty(&model)?);
    Ok(())
}

fn run_hashes(args: HashesArgs) -> CliResult {
    let mut s = Settings::default();
    s.chain_id = args.chain_id;
    s.signer.verifying_contract = args.verifier_address.clone();
    let domain = s.domain()?;
    let worker = parse_address(&args.worker)?;
    let terms = AttestedTerms {
        trust_score: 5000,
        pd: 100_000,
        credit_limit: 500_000_000,
        apr_bps: 1200,
        tenure_days: 14,
        fraud_flags: 0,
    };
    let mut att = CreditAttestation::issue(worker, terms, args.issued_at, s.signer.ttl_secs);
    if let Some(nonce) = args.nonce {
        att.nonce = nonce;
    }
    let hashes = TypedDataHashes::compute(&domain, &att);
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "attestation": att,
            "hashes": hashes,
        }))?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_lookback_flag_reaches_settings() {
        let cli = Cli::try_parse_from([
            "unempower",
            "poll",
            "--from",
            "1",
            "--to",
            "2",
            "--fallback-lookback",
            "2500",
        ])
        .unwrap();
        let Command::Poll(args) = cli.command else {
            panic!("expected poll");
        };
        assert_eq!(settings(&args.chain, None).fallback_lookback_blocks, 2500);
    }

    #[test]
    fn fallback_lookback_defaults() {
        let cli = Cli::try_parse_from(["unempower", "index"]).unwrap();
        let Command::Index(args) = cli.command else {
            panic!("expected index");
        };
        assert_eq!(
            settings(&args.chain, None).fallback_lookback_blocks,
            DEFAULT_LOOKBACK_BLOCKS
        );
    }
}
