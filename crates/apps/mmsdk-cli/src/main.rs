use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mmsdk_connect::{
    Approval, CommunicationLayerPreference, ConnectionLinks, LinkParams, LoopbackConnectorFactory,
    LoopbackProvider, LoopbackWallet, MetaMaskSdk, RequestArguments, SdkOptions, SdkServices,
};
use serde_json::{json, Value as JsonValue};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "mmsdk",
    about = "Connection links, config checks and an offline session demo",
    version
)]
struct Cli {
    /// Log filter, as accepted by RUST_LOG.
    #[arg(long, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build or inspect connection links.
    Link {
        #[command(subcommand)]
        action: LinkAction,
    },
    /// Parse a TOML options file and print the effective options.
    CheckConfig { path: PathBuf },
    /// Run a full connection against an in-process wallet.
    Demo {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = WalletMode::Approve)]
        wallet: WalletMode,
        /// Connect and sign this message in one approval.
        #[arg(long)]
        sign: Option<String>,
        /// Run this JSON-RPC method as part of the connection.
        #[arg(long, conflicts_with = "sign")]
        connect_with: Option<String>,
        /// Terminate the session before exiting.
        #[arg(long, default_value_t = false)]
        terminate: bool,
    },
}

#[derive(Subcommand, Debug)]
enum LinkAction {
    Encode {
        #[arg(long)]
        channel_id: String,
        #[arg(long, default_value = "")]
        pubkey: String,
        #[arg(long, default_value = "socket")]
        comm: String,
    },
    Decode { link: String },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum WalletMode {
    Approve,
    Reject,
}

impl From<WalletMode> for Approval {
    fn from(mode: WalletMode) -> Self {
        match mode {
            WalletMode::Approve => Approval::Approve,
            WalletMode::Reject => Approval::Reject,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log.as_str()))
        .init();
    match run(cli.command).await {
        Ok(output) => println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default()),
        Err(err) => {
            eprintln!("mmsdk error: {err:#}");
            std::process::exit(1);
        }
    }
}

async fn run(command: Command) -> Result<JsonValue> {
    match command {
        Command::Link { action: LinkAction::Encode { channel_id, pubkey, comm } } => {
            encode_link(channel_id, pubkey, &comm)
        }
        Command::Link { action: LinkAction::Decode { link } } => decode_link(&link),
        Command::CheckConfig { path } => check_config(path),
        Command::Demo { config, wallet, sign, connect_with, terminate } => {
            let options = match config {
                Some(path) => load_options(path)?,
                None => demo_options(),
            };
            run_demo(options, wallet.into(), sign, connect_with, terminate).await
        }
    }
}

fn encode_link(channel_id: String, pubkey: String, comm: &str) -> Result<JsonValue> {
    let Some(comm) = CommunicationLayerPreference::parse(comm) else {
        bail!("unknown communication layer '{comm}'");
    };
    let links = ConnectionLinks::build(&LinkParams::new(channel_id, comm, pubkey))?;
    Ok(json!({ "universal_link": links.universal_link, "deeplink": links.deeplink }))
}

fn decode_link(link: &str) -> Result<JsonValue> {
    let params = LinkParams::from_link(link)?;
    Ok(json!({
        "channel_id": params.channel_id,
        "comm": params.comm.as_str(),
        "pubkey": params.pubkey,
        "version": params.version,
        "originator_info": params.originator_info,
        "rpc": params.rpc,
    }))
}

fn load_options(path: PathBuf) -> Result<SdkOptions> {
    let mut options = SdkOptions::from_path(&path)
        .with_context(|| format!("loading options from {}", path.display()))?;
    options.apply_defaults();
    options.dapp_metadata.validate()?;
    Ok(options)
}

fn check_config(path: PathBuf) -> Result<JsonValue> {
    let options = load_options(path)?;
    if options.dapp_metadata.is_empty() {
        bail!("dapp_metadata needs a name or a url outside a browser");
    }
    Ok(serde_json::to_value(options)?)
}

fn demo_options() -> SdkOptions {
    let mut options = SdkOptions::default();
    options.dapp_metadata.name = Some("mmsdk demo".to_owned());
    options.dapp_metadata.url = Some("https://demo.mmsdk.invalid".to_owned());
    options.enable_analytics = false;
    options
}

async fn run_demo(
    options: SdkOptions,
    approval: Approval,
    sign: Option<String>,
    connect_with: Option<String>,
    terminate: bool,
) -> Result<JsonValue> {
    let wallet = Arc::new(LoopbackWallet::new(approval));
    let services = SdkServices::new(
        Arc::new(LoopbackProvider::new(wallet.clone())),
        Arc::new(LoopbackConnectorFactory::new(wallet)),
    );
    let sdk = MetaMaskSdk::new(options, services)?;

    let result = match (sign, connect_with) {
        (Some(message), _) => sdk.connect_and_sign(&message).await,
        (None, Some(method)) => sdk.connect_with(RequestArguments::new(method, json!([]))).await,
        (None, None) => sdk.connect().await,
    }
    .context("connecting to the wallet")?;
    log::info!("connected on channel {}", sdk.channel_id().unwrap_or_default());

    let report = json!({
        "result": result,
        "channel_id": sdk.channel_id(),
        "universal_link": sdk.universal_link().ok(),
        "terminated": terminate,
    });
    if terminate {
        sdk.terminate().await?;
    }
    Ok(report)
}
