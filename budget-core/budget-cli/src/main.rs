use anyhow::{Context as _, Result};
use budget_core::capability::CapabilityResolver;
use budget_core::context::{default_encoder, Turn};
use budget_core::cost::{IndexingCostEstimator, PricingTable};
use budget_core::observability::{setup_logging, LogFormat};
use budget_core::{BudgetConfig, CapabilityTable, ContextWindowManager, Conversation};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "prompt-budget", version, about = "Inspect prompt budgets, token counts and indexing cost")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolved token capacities for a model
    Capacity {
        #[arg(long)]
        provider: String,
        #[arg(long)]
        model: String,
    },
    /// Per-turn token counts for a conversation file
    Count {
        #[arg(long)]
        file: PathBuf,
    },
    /// Trim a conversation to a budget, or to a model's budget
    Truncate {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, conflicts_with_all = ["provider", "model"])]
        budget: Option<usize>,
        #[arg(long, requires = "model")]
        provider: Option<String>,
        #[arg(long, requires = "provider")]
        model: Option<String>,
    },
    /// Estimated cost of indexing the reference corpus with a model
    Cost {
        #[arg(long)]
        provider: String,
        #[arg(long)]
        model: String,
    },
}

fn main() {
    let cli = Cli::parse();
    setup_logging(if cli.json_logs { LogFormat::Json } else { LogFormat::Text });

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => BudgetConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => BudgetConfig::default(),
    }
    .apply_env()?;
    let table = Arc::new(CapabilityTable::build(&config.merged_overrides())?);
    tracing::debug!(version = table.version(), entries = table.len(), "Capability table ready");

    let output = match cli.command {
        Command::Capacity { provider, model } => {
            let resolver = CapabilityResolver::new(table, config.resolver_settings()?);
            json!({
                "provider": provider,
                "model": model,
                "max_tokens": resolver.max_tokens(&provider, &model),
                "max_output_tokens": resolver.max_output_tokens(&provider, &model),
                "max_input_tokens": resolver.max_input_tokens(&provider, &model, config.reserved_output_tokens),
                "supports_image_input": resolver.supports_image_input(&provider, &model),
                "reasoning_model": CapabilityResolver::is_reasoning_model(&model),
            })
        }
        Command::Count { file } => {
            let mut conversation = read_conversation(&file)?;
            let manager = ContextWindowManager::from_config(&config, table, default_encoder())?;
            let counts = conversation.token_counts(manager.token_counter())?;
            json!({ "counts": counts, "total": counts.iter().sum::<usize>() })
        }
        Command::Truncate {
            file,
            budget,
            provider,
            model,
        } => {
            let mut conversation = read_conversation(&file)?;
            let manager = ContextWindowManager::from_config(&config, table, default_encoder())?;
            match (budget, provider, model) {
                (Some(budget), _, _) => {
                    let counts = conversation.token_counts(manager.token_counter())?;
                    let truncator = budget_core::HistoryTruncator::new(config.per_message_overhead);
                    let turns = truncator.truncate(&conversation.turns, &counts, budget)?;
                    json!({ "budget": budget, "turns": turns })
                }
                (None, Some(provider), Some(model)) => {
                    let prompt = manager.manage_context(&mut conversation, &provider, &model)?;
                    json!({
                        "budget": prompt.budget,
                        "token_count": prompt.token_count,
                        "dropped": prompt.dropped,
                        "turns": prompt.turns,
                    })
                }
                _ => anyhow::bail!("pass either --budget or both --provider and --model"),
            }
        }
        Command::Cost { provider, model } => {
            let pricing = PricingTable::from_capabilities(&table);
            let estimator = IndexingCostEstimator::new(pricing, config.indexing.clone());
            let (input_tokens, output_tokens) = estimator.volumes().estimate_volumes();
            json!({
                "provider": provider,
                "model": model,
                "input_tokens": input_tokens,
                "output_tokens": output_tokens,
                "cost_usd": estimator.estimate(&provider, &model),
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn read_conversation(path: &Path) -> Result<Conversation> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let turns: Vec<Turn> =
        serde_json::from_str(&content).with_context(|| format!("parsing turns in {}", path.display()))?;
    Ok(Conversation::from_turns(turns))
}
