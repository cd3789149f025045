//! Quota Command Line Interface
//!
//! Operates a protocol instance persisted under a data directory. Every
//! command opens the store, runs one operation and exits.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use config::{Config, Environment, File as ConfigFile};
use quota_core::{parse_account, parse_amount, ClaimOutcome, Protocol, ProtocolConfig};
use quota_economics::{TaxCategory, TierThresholds};
use quota_storage::SledStateStore;
use quota_token::RebaseReport;
use quota_treasury::{DistributionPlan, DustPolicy};
use quota_types::{format_scaled, AccountId, Amount, Bps, Clock, ManualClock, SystemClock, Timestamp};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "quota")]
#[command(about = "Quota token economy command line interface", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML); QUOTA_* environment variables override it
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Directory holding the protocol state
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Account performing the operation (label or encoded key)
    #[arg(long, default_value = "admin")]
    caller: String,

    /// Fixed timestamp in seconds instead of the wall clock
    #[arg(long)]
    now: Option<Timestamp>,

    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the genesis state from the configuration
    Init,
    /// Supply, rebase and escrow summary
    Status,
    /// Elastic and stake-token balances of an account
    Balance { account: String },
    /// Join the referral forest below a referrer (the caller joins)
    Enroll {
        #[arg(long)]
        referrer: Option<String>,
    },
    /// Lock stake tokens (as the caller)
    Stake { amount: String },
    /// Unlock stake tokens (as the caller)
    Withdraw { amount: String },
    /// Claim and distribute the caller's reward
    Claim,
    /// Withdraw everything and claim
    Exit,
    /// Send elastic tokens from the caller
    Transfer { to: String, amount: String },
    /// Move elastic tokens from the caller into the reward escrow
    FundRewards { amount: String },
    /// Run a rebase epoch at the observed price
    Rebase { price: String },
    /// Show the split (in base units) a gross reward would produce
    Preview { gross: String, staker: String },
    /// Staking position and referral node of an account
    Position { account: String },
    /// Tax table administration
    Tax {
        #[command(subcommand)]
        action: TaxCommands,
    },
    /// Tier administration
    Tier {
        #[command(subcommand)]
        action: TierCommands,
    },
    /// Reward stream administration
    Rewards {
        #[command(subcommand)]
        action: RewardCommands,
    },
    /// Exempt an account from transfer limits
    Whitelist {
        account: String,
        #[arg(long)]
        remove: bool,
    },
    /// Issue stake tokens
    MintStake { to: String, amount: String },
    /// Hand governance of every engine to a new key
    TransferGovernance { new_admin: String },
}

#[derive(Subcommand)]
enum TaxCommands {
    Show,
    SetRate { category: TaxCategory, bps: Bps },
    SetPool { category: TaxCategory, pool: String },
    /// Referral rates of a tier for depths 0..4
    SetReferral { tier: u8, rates: Vec<Bps> },
    ClearReferral { tier: u8 },
    /// Route truncation dust to a category pool (or back to stakers)
    SetDust { category: Option<TaxCategory> },
}

#[derive(Subcommand)]
enum TierCommands {
    Set { participant: String, tier: u8 },
    Promote { participant: String },
    SetLimit { tier: u8, bps: Bps },
    SetThresholds {
        tier: u8,
        #[arg(long)]
        min_volume: String,
        #[arg(long)]
        min_days: u64,
        #[arg(long, num_args = 4, default_values_t = [0u32, 0, 0, 0])]
        min_referrals: Vec<u32>,
    },
    SetDepth { max_depth: usize },
}

#[derive(Subcommand)]
enum RewardCommands {
    /// Shared stream, tokens per second
    SetRate { per_second: String },
    /// Fixed per-token yield, yearly bps
    SetYearly { bps: Bps },
    /// Stream an amount over a duration (seconds)
    Notify { amount: String, duration: u64 },
    /// Limit staking to whitelisted accounts
    Restrict {
        #[arg(long)]
        off: bool,
    },
    /// Allow an account to stake while restricted
    Allow {
        account: String,
        #[arg(long)]
        remove: bool,
    },
}

// -----------------------------------------------------------------------------
// Settings
// -----------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(default)]
struct Settings {
    data_dir: PathBuf,
    log_level: String,
    log_format: LogFormat,
    protocol: ProtocolConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./quota-data"),
            log_level: "info".into(),
            log_format: LogFormat::Pretty,
            protocol: ProtocolConfig::default(),
        }
    }
}

impl Settings {
    fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                bail!("Configuration file {} not found", path.display());
            }
            builder = builder.add_source(ConfigFile::from(path));
        }
        builder = builder.add_source(
            Environment::with_prefix("QUOTA")
                .prefix_separator("_")
                .separator("__"),
        );
        let settings = builder
            .build()
            .context("reading configuration")?
            .try_deserialize()
            .context("parsing configuration")?;
        Ok(settings)
    }
}

fn init_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init(),
    }
}

/// Wall clock, or a fixed time when `--now` is given.
enum CliClock {
    System(SystemClock),
    Fixed(ManualClock),
}

impl Clock for CliClock {
    fn now(&self) -> Timestamp {
        match self {
            CliClock::System(clock) => clock.now(),
            CliClock::Fixed(clock) => clock.now(),
        }
    }
}

type CliProtocol = Protocol<SledStateStore, CliClock>;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    init_logging(&settings.log_level, cli.log_format.unwrap_or(settings.log_format));

    let data_dir = cli.data_dir.clone().unwrap_or_else(|| settings.data_dir.clone());
    let store = SledStateStore::new(data_dir.join("state"))
        .with_context(|| format!("opening state in {}", data_dir.display()))?;
    let clock = match cli.now {
        Some(now) => CliClock::Fixed(ManualClock::new(now)),
        None => CliClock::System(SystemClock::new()),
    };

    let mut protocol = match cli.command {
        Commands::Init => {
            let protocol = Protocol::genesis(&settings.protocol, store, clock)?;
            info!(data_dir = %data_dir.display(), "protocol initialized");
            protocol
        }
        _ => Protocol::open(store, clock).context("run `quota init` first")?,
    };
    let caller = account("--caller", &cli.caller)?;
    let output = run(&mut protocol, &caller, cli.command)?;
    protocol.flush()?;
    print(output)
}

fn run(protocol: &mut CliProtocol, caller: &AccountId, command: Commands) -> Result<Value> {
    let output = match command {
        Commands::Init | Commands::Status => status(protocol),
        Commands::Balance { account: who } => {
            let who = account("account", &who)?;
            json!({
                "account": who,
                "balance": amount_str(protocol.balance_of(&who)),
                "stake_balance": amount_str(protocol.stake_balance_of(&who)),
                "remaining_allowance": amount_str(protocol.remaining_allowance(&who)?),
            })
        }
        Commands::Enroll { referrer } => {
            let referrer = match referrer {
                Some(r) => account("referrer", &r)?,
                None => AccountId::ROOT,
            };
            serde_json::to_value(protocol.enroll(*caller, referrer)?)?
        }
        Commands::Stake { amount } => {
            protocol.stake(caller, parse_amount("amount", &amount)?)?;
            position(protocol, caller)?
        }
        Commands::Withdraw { amount } => {
            protocol.withdraw(caller, parse_amount("amount", &amount)?)?;
            position(protocol, caller)?
        }
        Commands::Claim => claim_output(protocol.claim(caller)?)?,
        Commands::Exit => claim_output(protocol.exit(caller)?)?,
        Commands::Transfer { to, amount } => {
            let to = account("to", &to)?;
            protocol.transfer(caller, &to, parse_amount("amount", &amount)?)?;
            json!({ "from": caller, "to": to, "amount": amount })
        }
        Commands::FundRewards { amount } => {
            protocol.fund_rewards(caller, parse_amount("amount", &amount)?)?;
            let escrow = protocol.state().distribution.settings().escrow;
            json!({ "escrow": escrow, "balance": amount_str(protocol.balance_of(&escrow)) })
        }
        Commands::Rebase { price } => {
            rebase_output(protocol.rebase(parse_amount("price", &price)?)?)
        }
        Commands::Preview { gross, staker } => {
            let staker = account("staker", &staker)?;
            plan_output(&protocol.preview_distribution(parse_amount("gross", &gross)?, &staker)?)
        }
        Commands::Position { account: who } => {
            let who = account("account", &who)?;
            position(protocol, &who)?
        }
        Commands::Tax { action } => tax(protocol, caller, action)?,
        Commands::Tier { action } => tier(protocol, caller, action)?,
        Commands::Rewards { action } => rewards(protocol, caller, action)?,
        Commands::Whitelist { account: who, remove } => {
            let who = account("account", &who)?;
            protocol.whitelist(caller, &who, !remove)?;
            json!({ "account": who, "whitelisted": !remove })
        }
        Commands::MintStake { to, amount } => {
            let to = account("to", &to)?;
            protocol.mint_stake_tokens(caller, &to, parse_amount("amount", &amount)?)?;
            json!({ "account": to, "stake_balance": amount_str(protocol.stake_balance_of(&to)) })
        }
        Commands::TransferGovernance { new_admin } => {
            let new_admin = account("new_admin", &new_admin)?;
            protocol.transfer_governance(caller, new_admin)?;
            json!({ "admin": new_admin })
        }
    };
    Ok(output)
}

fn tax(protocol: &mut CliProtocol, caller: &AccountId, action: TaxCommands) -> Result<Value> {
    match action {
        TaxCommands::Show => {}
        TaxCommands::SetRate { category, bps } => protocol.set_tax_rate(caller, category, bps)?,
        TaxCommands::SetPool { category, pool } => {
            protocol.set_tax_pool(caller, category, account("pool", &pool)?)?
        }
        TaxCommands::SetReferral { tier, rates } => {
            let rates: [Bps; 4] = rates
                .try_into()
                .map_err(|r: Vec<Bps>| anyhow::anyhow!("expected 4 rates, got {}", r.len()))?;
            protocol.set_referral_rates(caller, tier, rates)?
        }
        TaxCommands::ClearReferral { tier } => protocol.clear_referral_rates(caller, tier)?,
        TaxCommands::SetDust { category } => protocol.set_dust_policy(
            caller,
            category.map(DustPolicy::Pool).unwrap_or(DustPolicy::Staker),
        )?,
    }
    let tax = &protocol.state().tax;
    Ok(json!({
        "config": tax.config(),
        "total_configured_bps": tax.total_configured_bps(),
        "dust_policy": protocol.state().distribution.settings().dust_policy,
    }))
}

fn tier(protocol: &mut CliProtocol, caller: &AccountId, action: TierCommands) -> Result<Value> {
    let output = match action {
        TierCommands::Set { participant, tier } => {
            let participant = account("participant", &participant)?;
            let previous = protocol.set_tier(caller, &participant, tier)?;
            json!({ "participant": participant, "previous": previous, "tier": tier })
        }
        TierCommands::Promote { participant } => {
            let participant = account("participant", &participant)?;
            let promoted = protocol.promote(caller, &participant)?;
            json!({
                "participant": participant,
                "promoted_to": promoted,
                "metrics": protocol.tier_metrics(&participant),
            })
        }
        TierCommands::SetLimit { tier, bps } => {
            protocol.set_transfer_limit(caller, tier, bps)?;
            json!({ "tier": tier, "transfer_limit_bps": bps })
        }
        TierCommands::SetThresholds {
            tier,
            min_volume,
            min_days,
            min_referrals,
        } => {
            let min_referrals: [u32; 4] = min_referrals
                .try_into()
                .map_err(|r: Vec<u32>| anyhow::anyhow!("expected 4 referral counts, got {}", r.len()))?;
            let thresholds = TierThresholds {
                min_volume: parse_amount("min_volume", &min_volume)?,
                min_membership_days: min_days,
                min_referrals,
            };
            protocol.set_thresholds(caller, tier, thresholds)?;
            json!({ "tier": tier, "thresholds": thresholds })
        }
        TierCommands::SetDepth { max_depth } => {
            protocol.set_max_depth(caller, max_depth)?;
            json!({ "max_depth": max_depth })
        }
    };
    Ok(output)
}

fn rewards(protocol: &mut CliProtocol, caller: &AccountId, action: RewardCommands) -> Result<Value> {
    match action {
        RewardCommands::SetRate { per_second } => {
            protocol.set_reward_rate(caller, parse_amount("per_second", &per_second)?)?
        }
        RewardCommands::SetYearly { bps } => protocol.set_yearly_rate(caller, bps)?,
        RewardCommands::Notify { amount, duration } => {
            let rate = protocol.notify_reward(caller, parse_amount("amount", &amount)?, duration)?;
            info!(rate = %format_scaled(rate), duration, "reward stream started");
        }
        RewardCommands::Restrict { off } => protocol.set_staking_restricted(caller, !off)?,
        RewardCommands::Allow { account: who, remove } => {
            protocol.set_staking_whitelisted(caller, account("account", &who)?, !remove)?
        }
    }
    let accrual = &protocol.state().accrual;
    Ok(json!({
        "mode": accrual.mode(),
        "period_finish": accrual.period_finish(),
        "total_staked": amount_str(accrual.total_staked()),
        "restricted": accrual.is_restricted(),
    }))
}

// -----------------------------------------------------------------------------
// Output
// -----------------------------------------------------------------------------

fn account(field: &str, value: &str) -> Result<AccountId> {
    Ok(parse_account(field, value)?)
}

fn amount_str(amount: Amount) -> String {
    format_scaled(amount).to_string()
}

fn print(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn status(protocol: &CliProtocol) -> Value {
    let state = protocol.state();
    let rebase = state.token.rebase_controller();
    let escrow = state.distribution.settings().escrow;
    json!({
        "now": protocol.now(),
        "admin": state.token.governor().admin(),
        "total_supply": amount_str(state.token.total_supply()),
        "scaling_factor": amount_str(rebase.scaling_factor()),
        "rebase_epoch": rebase.state().epoch,
        "next_rebase_at": rebase.next_allowed_at(),
        "reward_escrow": escrow,
        "escrow_balance": amount_str(state.token.balance_of(&escrow)),
        "total_staked": amount_str(state.accrual.total_staked()),
        "participants": state.referrals.len(),
        "distributions": state.distribution.stats(),
    })
}

fn position(protocol: &CliProtocol, who: &AccountId) -> Result<Value> {
    Ok(json!({
        "account": who,
        "position": protocol.position(who),
        "earned": amount_str(protocol.earned(who)?),
        "node": protocol.node(who),
    }))
}

fn plan_output(plan: &DistributionPlan) -> Value {
    let payouts: Vec<Value> = plan
        .payouts
        .iter()
        .map(|p| {
            json!({
                "recipient": p.recipient,
                "kind": p.kind,
                "rate_bps": p.rate_bps,
                "amount": amount_str(p.amount),
            })
        })
        .collect();
    json!({
        "gross": amount_str(plan.gross),
        "staker": plan.staker,
        "payouts": payouts,
        "dust": amount_str(plan.dust),
    })
}

fn claim_output(outcome: ClaimOutcome) -> Result<Value> {
    Ok(json!({
        "withdrawn": amount_str(outcome.withdrawn),
        "gross": amount_str(outcome.gross),
        "distribution": outcome.receipt.as_ref().map(|r| json!({
            "requested": amount_str(r.requested),
            "base_units": plan_output(&r.plan),
        })),
    }))
}

fn rebase_output(report: RebaseReport) -> Value {
    json!({
        "epoch": report.outcome.epoch,
        "direction": report.outcome.direction,
        "price": amount_str(report.outcome.price),
        "deviation": amount_str(report.outcome.deviation),
        "scaling_factor": amount_str(report.outcome.scaling_factor),
        "supply_before": amount_str(report.supply_before),
        "supply_after": amount_str(report.supply_after),
        "expansion_minted": amount_str(report.expansion_minted),
    })
}
