//! Ledger PoW command-line tool
//!
//! Mines and verifies ledger blocks from JSON on disk or stdin. Results are
//! printed to stdout as JSON; logs go to stderr.

use clap::{Args, Parser, Subcommand};
use ledger_pow::consensus::{current_timestamp, Block, BlockSkeleton, IdentifierPolicy, MiningPolicy};
use ledger_pow::crypto::digest_hex;
use ledger_pow::logging::{init_logging, LogFormat};
use ledger_pow::mining::{MiningAttempt, MiningError, MiningState};
use ledger_pow::storage::Chain;
use serde::Serialize;
use serde_json::{json, Value};
use std::error::Error;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::info;

/// Proof-of-work miner and verifier for ledger blocks.
#[derive(Parser, Debug)]
#[command(name = "ledger-pow", version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Default log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log format: "pretty" or "json"
    #[arg(long, global = true, env = "LEDGER_POW_LOG_FORMAT", default_value = "pretty")]
    log_format: String,

    #[command(flatten)]
    policy: PolicyArgs,
}

/// Mining policy overrides, applied on top of the LEDGER_POW_* environment
#[derive(Args, Debug)]
struct PolicyArgs {
    /// Required leading '0' hex digits
    #[arg(long, global = true)]
    leading_zeros: Option<usize>,

    /// Highest nonce tried before giving up
    #[arg(long, global = true)]
    max_nonce: Option<u64>,

    /// Reject line items without any identifier
    #[arg(long, global = true)]
    require_identifiers: bool,

    /// Do not keep the hash input on every attempt
    #[arg(long, global = true)]
    compact_trace: bool,
}

impl PolicyArgs {
    fn resolve(&self) -> Result<MiningPolicy, Box<dyn Error>> {
        let mut policy = MiningPolicy::from_env()?;
        if let Some(leading_zeros) = self.leading_zeros {
            policy.leading_zeros = leading_zeros;
        }
        if let Some(max_nonce) = self.max_nonce {
            policy.max_nonce = max_nonce;
        }
        if self.require_identifiers {
            policy.identifiers = IdentifierPolicy::Require;
        }
        if self.compact_trace {
            policy.keep_hash_inputs = false;
        }
        Ok(policy)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the SHA-256 digest of a string
    Digest {
        /// Text to hash (characters up to U+00FF)
        text: String,
    },
    /// Mine a block for a payload
    Mine(MineArgs),
    /// Verify one block, or validate a whole chain
    Verify(VerifyArgs),
    /// Mine a short sample chain and validate it
    Demo {
        /// Blocks to mine after genesis
        #[arg(long, default_value_t = 3)]
        blocks: u64,
    },
}

#[derive(Args, Debug)]
struct MineArgs {
    /// Payload JSON file ("-" for stdin)
    #[arg(long)]
    data: PathBuf,

    /// Existing chain JSON file (array of blocks)
    #[arg(long)]
    chain: Option<PathBuf>,

    /// Block index (defaults to the chain height)
    #[arg(long)]
    index: Option<u64>,

    /// Previous block hash (defaults to the chain tip or "0")
    #[arg(long)]
    previous_hash: Option<String>,

    /// Block timestamp (defaults to now)
    #[arg(long)]
    timestamp: Option<String>,

    /// Include every attempt in the output
    #[arg(long)]
    trace: bool,
}

#[derive(Args, Debug)]
struct VerifyArgs {
    /// Chain JSON file ("-" for stdin)
    #[arg(long)]
    chain: PathBuf,

    /// Verify only the block with this index
    #[arg(long)]
    index: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MineReport<'a> {
    state: MiningState,
    attempt_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    attempts: Option<&'a [MiningAttempt]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    block: Option<&'a Block>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, LogFormat::from_str_lossy(&cli.log_format));
    let policy = cli.policy.resolve()?;

    match cli.command {
        Commands::Digest { text } => println!("{}", digest_hex(&text)?),
        Commands::Mine(args) => run_mine(args, policy).await?,
        Commands::Verify(args) => run_verify(args, policy)?,
        Commands::Demo { blocks } => run_demo(blocks, policy).await?,
    }

    Ok(())
}

async fn run_mine(args: MineArgs, policy: MiningPolicy) -> Result<(), Box<dyn Error>> {
    let data: Value = serde_json::from_str(&read_input(&args.data)?)?;
    let blocks: Vec<Block> = match &args.chain {
        Some(path) => serde_json::from_str(&read_input(path)?)?,
        None => Vec::new(),
    };
    let chain = Chain::from_blocks(policy, blocks);

    let index = args.index.unwrap_or(chain.height() as u64);
    let previous_hash = args
        .previous_hash
        .unwrap_or_else(|| chain.tip_hash().to_string());
    let timestamp = args.timestamp.unwrap_or_else(current_timestamp);
    let skeleton = BlockSkeleton::new(index, timestamp, data, previous_hash.clone());

    let outcome = chain
        .miner()
        .mine_in_background(skeleton, previous_hash, chain.blocks().to_vec())
        .await?;

    let report = MineReport {
        state: outcome.state(),
        attempt_count: outcome.attempts().len(),
        attempts: args.trace.then(|| outcome.attempts()),
        block: outcome.block(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if outcome.block().is_none() {
        return Err(MiningError::Exhausted {
            max_nonce: chain.miner().policy().max_nonce,
        }
        .into());
    }
    Ok(())
}

fn run_verify(args: VerifyArgs, policy: MiningPolicy) -> Result<(), Box<dyn Error>> {
    let blocks: Vec<Block> = serde_json::from_str(&read_input(&args.chain)?)?;
    let chain = Chain::from_blocks(policy, blocks);

    let valid = match args.index {
        Some(index) => {
            let block = chain
                .blocks()
                .iter()
                .find(|b| b.index == index)
                .ok_or_else(|| format!("no block with index {index} in the chain"))?;
            let verification = chain.miner().verify(block, chain.blocks())?;
            println!("{}", serde_json::to_string_pretty(&verification)?);
            verification.is_valid()
        }
        None => {
            let report = chain.validate();
            println!("{}", serde_json::to_string_pretty(&report)?);
            report.is_valid()
        }
    };

    if !valid {
        return Err("verification failed".into());
    }
    Ok(())
}

async fn run_demo(blocks: u64, policy: MiningPolicy) -> Result<(), Box<dyn Error>> {
    info!(blocks, leading_zeros = policy.leading_zeros, "mining sample chain");

    let chain = tokio::task::spawn_blocking(move || -> Result<Chain, MiningError> {
        let mut chain = Chain::with_genesis(policy)?;
        for n in 1..=blocks {
            chain.mine_next(current_timestamp(), sample_order(n))?;
        }
        Ok(chain)
    })
    .await??;

    let report = chain.validate();
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "blocks": chain.blocks(),
            "validation": report,
        }))?
    );
    Ok(())
}

fn sample_order(n: u64) -> Value {
    json!({
        "transactionId": format!("TX-{n:04}"),
        "buyer": "buyer-001",
        "vendor": "vendor-001",
        "items": [
            {"name": "Steel bolt M8", "sku": format!("BOLT-{n}"), "quantity": n, "price": 1.25},
            {"name": "Washer", "tokens": [format!("WSH-{n}-A"), format!("WSH-{n}-B")], "qty": "10", "unitPrice": "0.10"}
        ],
        "total": 1.25 * n as f64 + 1.0,
        "timestamp": current_timestamp(),
        "buyerName": "PT Maju Jaya",
        "vendorName": "CV Sumber Baut"
    })
}

fn read_input(path: &Path) -> std::io::Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read_to_string(path)
    }
}
