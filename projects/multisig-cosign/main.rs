use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use comfy_table::Table;
use ethereum_types::U256;
use ethers_core::utils::{parse_units, to_checksum};
use tracing::{error, info};

use multisig_cosign::chains::ethereum::{parse_address, EthereumSupport};
use multisig_cosign::config::{get_config_path, load_config, Overrides, Settings};
use multisig_cosign::cosign::{prepare, raw_output, sign_plan, submit, transaction_status, TxOverrides};
use multisig_cosign::device::open_signer;
use multisig_cosign::features::{list_connected_devices, DeviceKind};
use multisig_cosign::multisig::{MultisigAction, MultisigContract};
use multisig_cosign::prompt::{Prompt, TerminalPrompt};
use multisig_cosign::rpc::{EthClient, HttpRpc, DEFAULT_REQUEST_TIMEOUT};
use multisig_cosign::CosignError;

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Co-sign pending MultiSigWallet transactions with a hardware wallet
#[derive(Parser, Debug)]
#[command(name = "msig-cosign")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct GlobalOpts {
    /// Ethereum JSON-RPC endpoint
    #[arg(long, env = "HTTP_RPC_URL", global = true)]
    rpc_url: Option<String>,

    /// Config file (default: ~/.multisig-cosign/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Only use this device family
    #[arg(long, value_enum, global = true)]
    device: Option<DeviceKind>,

    /// Derivation path of the owner key
    #[arg(long, global = true)]
    path: Option<String>,

    /// Chain id for EIP-155 (default: eth_chainId)
    #[arg(long, global = true)]
    chain_id: Option<u64>,

    /// MultiSigWallet ABI file (default: bundled ABI)
    #[arg(long, global = true)]
    abi: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List connected signing devices
    Devices,
    /// Show the owner address of the device
    Address {
        /// Also show the address on the device screen
        #[arg(long)]
        display: bool,
    },
    /// Show the confirmation state of a multisig transaction
    Status(StatusArgs),
    /// Confirm a pending multisig transaction
    Confirm(ActionArgs),
    /// Revoke an earlier confirmation
    Revoke(ActionArgs),
    /// Execute a fully confirmed transaction
    Execute(ActionArgs),
}

#[derive(Args, Debug)]
struct StatusArgs {
    /// Multisig wallet address
    #[arg(long)]
    multisig: Option<String>,

    /// Multisig transaction id
    #[arg(long, value_parser = parse_tx_id)]
    tx_id: U256,

    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct ActionArgs {
    /// Multisig wallet address (prompted when missing)
    #[arg(long)]
    multisig: Option<String>,

    /// Multisig transaction id (prompted when missing)
    #[arg(long, value_parser = parse_tx_id)]
    tx_id: Option<U256>,

    /// Gas price in gwei (prompted when missing, empty uses eth_gasPrice)
    #[arg(long, value_parser = parse_gwei)]
    gas_price: Option<U256>,

    /// Gas limit
    #[arg(long)]
    gas_limit: Option<u64>,

    /// Nonce (default: pending transaction count of the owner)
    #[arg(long)]
    nonce: Option<u64>,

    /// Print the signed transaction instead of broadcasting it
    #[arg(long)]
    print_only: bool,

    /// Do not ask for confirmation
    #[arg(short, long)]
    yes: bool,

    /// After broadcasting, wait this long for the receipt (e.g. "2m")
    #[arg(long)]
    wait: Option<humantime::Duration>,
}

fn parse_tx_id(text: &str) -> std::result::Result<U256, String> {
    U256::from_dec_str(text.trim()).map_err(|_| format!("invalid transaction id: {}", text))
}

fn parse_gwei(text: &str) -> std::result::Result<U256, String> {
    parse_units(text.trim(), "gwei")
        .map(Into::into)
        .map_err(|e| format!("invalid gas price {}: {}", text, e))
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(
        level
            .parse()
            .unwrap_or_else(|_| tracing_subscriber::filter::LevelFilter::INFO.into()),
    );
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);

    if let Err(e) = run(cli).await {
        error!("❌ {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.global.config.clone().unwrap_or_else(get_config_path);
    let file = load_config(&config_path)?;

    let multisig = match &cli.command {
        Commands::Status(args) => args.multisig.clone(),
        Commands::Confirm(args) | Commands::Revoke(args) | Commands::Execute(args) => {
            args.multisig.clone()
        }
        _ => None,
    };
    let gas_limit = match &cli.command {
        Commands::Confirm(args) | Commands::Revoke(args) | Commands::Execute(args) => args.gas_limit,
        _ => None,
    };
    let settings = Settings::resolve(
        Overrides {
            rpc_url: cli.global.rpc_url.clone(),
            multisig,
            chain_id: cli.global.chain_id,
            derivation_path: cli.global.path.clone(),
            gas_limit,
            device: cli.global.device,
            abi_path: cli.global.abi.clone(),
        },
        file,
    )?;

    match cli.command {
        Commands::Devices => list_devices(),
        Commands::Address { display } => show_address(&settings, display),
        Commands::Status(args) => show_status(&settings, args).await,
        Commands::Confirm(args) => run_action(&settings, MultisigAction::Confirm, args).await,
        Commands::Revoke(args) => run_action(&settings, MultisigAction::Revoke, args).await,
        Commands::Execute(args) => run_action(&settings, MultisigAction::Execute, args).await,
    }
}

fn list_devices() -> Result<()> {
    let devices = list_connected_devices()?;
    if devices.is_empty() {
        info!("🔍 No supported signing devices connected");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Kind", "Name", "Interface", "VID:PID", "Id"]);
    for device in &devices {
        table.add_row(vec![
            device.kind.to_string(),
            device.name.clone(),
            format!("{:?}", device.interface),
            format!("{:04x}:{:04x}", device.vid, device.pid),
            device.unique_id.clone(),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn show_address(settings: &Settings, display: bool) -> Result<()> {
    let mut signer = open_signer(settings.device, Box::new(TerminalPrompt), settings.device_timeout)?;
    let address = EthereumSupport::get_address(signer.as_mut(), &settings.derivation_path, display)?;
    println!("{}", to_checksum(&address, None));
    Ok(())
}

fn load_contract(settings: &Settings, prompt: &mut dyn Prompt) -> Result<MultisigContract> {
    let address = match settings.multisig {
        Some(address) => address,
        None => parse_address(&prompt.ask("Multisig address")?)?,
    };
    let contract = match &settings.abi_path {
        Some(path) => MultisigContract::from_abi_file(address, path)
            .with_context(|| format!("loading ABI from {}", path.display()))?,
        None => MultisigContract::bundled(address)?,
    };
    Ok(contract)
}

fn client(settings: &Settings) -> Result<EthClient<HttpRpc>> {
    let rpc = HttpRpc::new(settings.rpc_url()?, DEFAULT_REQUEST_TIMEOUT)?;
    info!("🌐 Using node {}", rpc.url());
    Ok(EthClient::new(rpc))
}

async fn show_status(settings: &Settings, args: StatusArgs) -> Result<()> {
    let mut prompt = TerminalPrompt;
    let contract = load_contract(settings, &mut prompt)?;
    let client = client(settings)?;
    let status = transaction_status(&client, &contract, args.tx_id).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Field", "Value"]);
    table.add_row(vec!["Transaction".to_string(), status.transaction_id.to_string()]);
    table.add_row(vec!["Destination".to_string(), to_checksum(&status.pending.destination, None)]);
    table.add_row(vec!["Value (wei)".to_string(), status.pending.value.to_string()]);
    table.add_row(vec!["Data".to_string(), format!("0x{}", hex::encode(&status.pending.data))]);
    table.add_row(vec!["Executed".to_string(), status.pending.executed.to_string()]);
    table.add_row(vec![
        "Confirmations".to_string(),
        format!("{}/{}", status.confirmations, status.required),
    ]);
    for owner in &status.owners {
        let mark = if status.confirmed_by.contains(owner) { "✔" } else { "" };
        table.add_row(vec![format!("Owner {}", to_checksum(owner, None)), mark.to_string()]);
    }
    println!("{table}");
    Ok(())
}

async fn run_action(settings: &Settings, action: MultisigAction, args: ActionArgs) -> Result<()> {
    let mut prompt = TerminalPrompt;
    let contract = load_contract(settings, &mut prompt)?;

    let id = match args.tx_id {
        Some(id) => id,
        None => parse_tx_id(&prompt.ask(&format!("Transaction id to {}", action))?)
            .map_err(CosignError::InvalidInput)?,
    };
    let gas_price = match args.gas_price {
        Some(gas_price) => Some(gas_price),
        None if args.yes => None,
        None => {
            let answer = prompt.ask("Gas price in gwei (empty for the node's price)")?;
            if answer.is_empty() {
                None
            } else {
                Some(parse_gwei(&answer).map_err(CosignError::InvalidInput)?)
            }
        }
    };

    let client = client(settings)?;
    let mut signer = open_signer(settings.device, Box::new(TerminalPrompt), settings.device_timeout)?;
    let owner = EthereumSupport::get_address(signer.as_mut(), &settings.derivation_path, false)?;

    let overrides = TxOverrides {
        nonce: args.nonce.map(U256::from),
        gas_price,
        gas_limit: Some(U256::from(settings.gas_limit)),
        chain_id: settings.chain_id,
    };
    let plan = prepare(&client, &contract, owner, action, id, &overrides).await?;
    eprintln!("{}", serde_json::to_string_pretty(&plan)?);

    let question = if args.print_only { "Sign" } else { "Sign and broadcast" };
    if !args.yes && !prompt.confirm(question)? {
        return Err(CosignError::Aborted.into());
    }

    let signed = sign_plan(signer.as_mut(), &settings.derivation_path, &plan)?;
    if args.print_only {
        println!("{}", raw_output(&signed));
        return Ok(());
    }

    let hash = submit(&client, &signed).await?;
    println!("{:?}", hash);

    if let Some(wait) = args.wait {
        match client.wait_for_receipt(hash, wait.into(), RECEIPT_POLL_INTERVAL).await? {
            Some(receipt) => {
                let succeeded = receipt.status.map_or(false, |status| status.as_u64() == 1);
                info!(
                    "{} Mined in block {:?}, gas used {:?}",
                    if succeeded { "✅" } else { "❌" },
                    receipt.block_number,
                    receipt.gas_used
                );
                if !succeeded {
                    anyhow::bail!("transaction {:?} reverted", hash);
                }
            }
            None => info!("⏳ Not mined yet; check {:?} later", hash),
        }
    }
    Ok(())
}
