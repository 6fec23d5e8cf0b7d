//! Faucet operator CLI

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use claim_engine::{ChannelSelector, ClaimEngine, ClaimRequest, Config};
use claim_ledger::{ChannelId, CommunityId, ParticipantId};
use claim_policy::{JsonPolicyStore, ListKind, Scope};
use prometheus::Encoder;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "faucet")]
#[command(about = "Claim ledger and distribution engine", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults plus environment when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print collected metrics to stderr on exit
    #[arg(long, global = true, default_value_t = false)]
    print_metrics: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Claim one payout
    Claim {
        /// Channel (e.g. base-usdt, sepolia-eth)
        #[arg(long)]
        channel: String,

        /// Destination address
        #[arg(long)]
        address: String,

        /// Participant id
        #[arg(long)]
        user: String,

        /// Community id
        #[arg(long)]
        community: String,

        /// Participant lacks the faucet role
        #[arg(long, default_value_t = false)]
        without_role: bool,
    },

    /// Show per-channel counters, recent claims and balances
    Status {
        /// Community whose caps apply
        #[arg(long)]
        community: String,
    },

    /// Pause a channel, or `all`
    Pause { channel: String },

    /// Resume a channel, or `all`
    Resume { channel: String },

    /// Write successful claims as CSV to stdout
    Export {
        /// Only this channel
        #[arg(long)]
        channel: Option<String>,
    },

    /// Settle claims awaiting confirmation
    Reconcile,

    /// Drop a pending claim after checking its transfer by hand
    ClearPending {
        #[arg(long)]
        channel: String,

        #[arg(long)]
        user: String,
    },

    /// Set a community's cap for a channel
    SetCap {
        #[arg(long)]
        community: String,

        #[arg(long)]
        channel: String,

        /// Maximum successful claims (at least 1)
        cap: u64,
    },

    /// Set a community's cooldown
    SetCooldown {
        #[arg(long)]
        community: String,

        /// Hours between claims (1 to 168)
        hours: u64,
    },

    /// Edit the whitelist
    Whitelist {
        #[command(subcommand)]
        cmd: ListCmd,
    },

    /// Edit the blacklist
    Blacklist {
        #[command(subcommand)]
        cmd: ListCmd,
    },

    /// Move legacy `giveaway` policy settings under `faucet`
    MigratePolicy,
}

#[derive(Subcommand)]
enum ListCmd {
    /// Add a participant
    Add(ListArgs),

    /// Remove a participant
    Remove(ListArgs),
}

#[derive(Args)]
struct ListArgs {
    /// Participant id
    user: String,

    /// Community list to edit
    #[arg(long, required_unless_present = "global", conflicts_with = "global")]
    community: Option<String>,

    /// Edit the global list instead
    #[arg(long, default_value_t = false)]
    global: bool,
}

impl ListArgs {
    fn scope(&self) -> Scope {
        match &self.community {
            Some(community) if !self.global => Scope::Community(CommunityId::new(community.clone())),
            _ => Scope::Global,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::from_env().context("loading configuration from environment")?,
    };

    let engine = ClaimEngine::from_config(&config)?;
    let outcome = run(&engine, &config, cli.cmd).await;

    if cli.print_metrics {
        let mut buffer = Vec::new();
        prometheus::TextEncoder::new().encode(&engine.metrics().registry().gather(), &mut buffer)?;
        eprint!("{}", String::from_utf8_lossy(&buffer));
    }

    outcome
}

async fn run(engine: &ClaimEngine, config: &Config, cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Claim {
            channel,
            address,
            user,
            community,
            without_role,
        } => {
            let request = ClaimRequest {
                channel: ChannelId::new(channel),
                address,
                participant: ParticipantId::new(user),
                community: CommunityId::new(community),
                has_required_role: !without_role,
            };
            match engine.claim(request).await {
                Ok(success) => {
                    println!(
                        "Sent {} {} to {} (claim #{})",
                        success.amount, success.symbol, success.address, success.index
                    );
                    println!("{}", success.explorer_url);
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Claim not paid");
                    anyhow::bail!("{}", e.user_message());
                }
            }
        }

        Commands::Status { community } => {
            for status in engine.status(&CommunityId::new(community)).await? {
                println!(
                    "{}: {}/{} claimed, {} remaining, {} pending{}",
                    status.channel,
                    status.total,
                    status.cap,
                    status.remaining,
                    status.pending,
                    if status.paused { " [paused]" } else { "" }
                );
                match &status.balances {
                    Some(balances) => match balances.token {
                        Some(token) => println!("  balance: {} token, {} gas", token, balances.native),
                        None => println!("  balance: {}", balances.native),
                    },
                    None => println!("  balance: unavailable"),
                }
                for receipt in status.recent.iter().rev() {
                    println!(
                        "  {} {} {} {}",
                        receipt.timestamp.to_rfc3339(),
                        receipt.participant,
                        receipt.address,
                        receipt.reference
                    );
                }
            }
        }

        Commands::Pause { channel } => {
            let selector: ChannelSelector = channel.parse()?;
            let changed = engine.set_paused(&selector, true).await?;
            println!("Paused: {}", join(&changed));
        }

        Commands::Resume { channel } => {
            let selector: ChannelSelector = channel.parse()?;
            let changed = engine.set_paused(&selector, false).await?;
            println!("Resumed: {}", join(&changed));
        }

        Commands::Export { channel } => {
            let channel = channel.map(ChannelId::new);
            print!("{}", engine.export_csv(channel.as_ref())?);
        }

        Commands::Reconcile => {
            let report = engine.reconcile_pending().await?;
            println!(
                "Confirmed {}, reverted {}, still pending {}",
                report.confirmed.len(),
                report.reverted.len(),
                report.still_pending
            );
        }

        Commands::ClearPending { channel, user } => {
            let channel = ChannelId::new(channel);
            match engine
                .clear_pending(&channel, &ParticipantId::new(user.clone()))
                .await?
            {
                Some(cleared) => println!(
                    "Cleared pending claim of {} on {} ({})",
                    user,
                    channel,
                    cleared.reference.as_deref().unwrap_or("no transaction hash")
                ),
                None => println!("No pending claim for {} on {}", user, channel),
            }
        }

        Commands::SetCap {
            community,
            channel,
            cap,
        } => {
            let channel = ChannelId::new(channel);
            engine.set_cap(&CommunityId::new(community), &channel, cap)?;
            println!("Cap for {} set to {}", channel, cap);
        }

        Commands::SetCooldown { community, hours } => {
            engine.set_cooldown_hours(&CommunityId::new(community), hours)?;
            println!("Cooldown set to {} hour(s)", hours);
        }

        Commands::Whitelist { cmd } => edit_list(engine, ListKind::Whitelist, cmd)?,
        Commands::Blacklist { cmd } => edit_list(engine, ListKind::Blacklist, cmd)?,

        Commands::MigratePolicy => {
            let store = JsonPolicyStore::new(config.policy_path(), config.global_policy_path());
            let report = store.migrate_legacy()?;
            if report.is_empty() {
                println!("Nothing to migrate");
            } else {
                println!(
                    "Migrated {} communities{}",
                    report.communities.len(),
                    if report.global { " and global settings" } else { "" }
                );
            }
        }
    }

    Ok(())
}

fn edit_list(engine: &ClaimEngine, kind: ListKind, cmd: ListCmd) -> Result<()> {
    let (args, add) = match cmd {
        ListCmd::Add(args) => (args, true),
        ListCmd::Remove(args) => (args, false),
    };
    let scope = args.scope();
    let participant = ParticipantId::new(args.user);
    let changed = engine.update_list(&scope, kind, &participant, add)?;

    let verb = if add { "added to" } else { "removed from" };
    if changed {
        println!("{} {} {} {}", participant, verb, scope, kind);
    } else {
        println!("{} already {} {} {}", participant, if add { "on" } else { "off" }, scope, kind);
    }
    Ok(())
}

fn join(channels: &[ChannelId]) -> String {
    channels
        .iter()
        .map(ChannelId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
