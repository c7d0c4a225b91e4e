use alloy::primitives::{B256, U256};
use clap::{Parser, Subcommand};
use eyre::Result;
use std::str::FromStr;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mev_engine::config::thresholds::DUST_MINED;
use mev_engine::config::{tokens, Config};
use mev_engine::dex::uniswap_v2::get_amount_out;
use mev_engine::dex::FeeFraction;
use mev_engine::graph::{arbitrage_link_pairs, sandwich_link_pairs};
use mev_engine::orchestrator::{self, Strategy};
use mev_engine::trace::trace_transaction;

#[derive(Parser)]
#[command(name = "mev-engine")]
#[command(about = "BSC arbitrage and sandwich engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream pending transactions and evaluate them (default)
    Run {
        /// Attack the workers search for
        #[arg(long, value_enum, default_value_t = Strategy::Arbitrage)]
        strategy: Strategy,
    },

    /// Trace a mined transaction and print its swaps
    Trace {
        /// Transaction hash
        hash: String,
    },

    /// Offline constant-product quote
    Quote {
        #[arg(long)]
        amount_in: U256,

        #[arg(long)]
        reserve_in: U256,

        #[arg(long)]
        reserve_out: U256,

        /// Fee denominator
        #[arg(long, default_value = "1000")]
        fee_n: u64,

        /// Fee numerator taken by the pool
        #[arg(long, default_value = "3")]
        fee_s: u64,
    },
}

fn init_tracing() -> Result<()> {
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let builder = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(EnvFilter::from_default_env())
        .with_thread_names(true);
    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

async fn run_trace(hash: &str) -> Result<()> {
    let config = Config::from_env()?;
    let provider = orchestrator::connect(&config.http_endpoint)?;
    let hash = B256::from_str(hash)?;
    let wrapped = config.wrapped_native;

    let tx = trace_transaction(&provider, hash, wrapped, U256::from(DUST_MINED)).await?;
    println!("Transaction {}", tx.hash);
    println!("  from {} to {:?} gas {} price {}", tx.caller, tx.receiver, tx.gas, tx.effective_gas_price());
    if tx.swap_events.is_empty() {
        println!("  no swaps");
        return Ok(());
    }
    for event in &tx.swap_events {
        println!(
            "  {} {}: {} {} -> {} {}",
            event.dex,
            event.pool,
            event.amount_in,
            tokens::symbol(event.token_in),
            event.amount_out,
            tokens::symbol(event.token_out)
        );
    }
    println!("  arbitrage pairs: {:?}", arbitrage_link_pairs(&tx.swap_events, wrapped));
    println!("  sandwich pairs: {:?}", sandwich_link_pairs(&tx.swap_events, wrapped));
    Ok(())
}

fn run_quote(amount_in: U256, reserve_in: U256, reserve_out: U256, fee_n: u64, fee_s: u64) -> Result<()> {
    let fee = FeeFraction::try_new(fee_n, fee_s)
        .ok_or_else(|| eyre::eyre!("fee {}/{} takes the whole input", fee_s, fee_n))?;
    let out = get_amount_out(amount_in, reserve_in, reserve_out, fee)?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run { strategy }) => {
            let config = Config::from_env()?;
            info!("Starting {} engine with {} workers", strategy, config.workers);
            orchestrator::run(config, strategy).await
        }
        None => orchestrator::run(Config::from_env()?, Strategy::Arbitrage).await,
        Some(Commands::Trace { hash }) => run_trace(&hash).await,
        Some(Commands::Quote { amount_in, reserve_in, reserve_out, fee_n, fee_s }) => {
            run_quote(amount_in, reserve_in, reserve_out, fee_n, fee_s)
        }
    }
}
