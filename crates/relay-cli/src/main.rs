use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use relay_config::{find_config_path, load_config, save_config, Config, ModelRef};
use relay_core::{
    Category, Classifier, Decomposer, ModelInvoker, ModelPool, Pipeline, PipelineOutcome,
    RigInvoker, TaskRequest,
};
#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;
use rig::client::{CompletionClient, Nothing};
use rig::providers::{anthropic, deepseek, ollama, openai, openrouter};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

const VALID_PROVIDERS: &str = "anthropic, openai, ollama, openrouter, deepseek";

/// Render markdown text to the terminal using termimad.
fn render_markdown(text: &str) {
    let skin = termimad::MadSkin::default();
    skin.print_text(text);
}

#[derive(Parser)]
#[command(
    name = "relay",
    about = "Route tasks to LLM roles and aggregate their work",
    version
)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Debug logging for the pipeline
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline on one task
    Run {
        /// Task description
        task: String,

        /// Print the outcome as JSON instead of Markdown
        #[arg(long)]
        json: bool,
    },
    /// Only classify a task
    Classify {
        /// Task description
        task: String,
    },
    /// Only decompose a task into roles
    Decompose {
        /// Task description
        task: String,
    },
    /// Read tasks line by line and run each through the pipeline
    Interactive,
    /// Show configuration and model tiers
    Status,
    /// Write a default config file
    Onboard {
        /// Skip interactive prompts and write defaults
        #[arg(long)]
        non_interactive: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let base_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = if cli.verbose {
        format!("{base_filter},relay_core=debug")
    } else {
        base_filter
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Onboard { non_interactive } => {
            return run_onboard(cli.config, non_interactive);
        }
        Commands::Status => {
            let config_path = cli.config.unwrap_or_else(find_config_path);
            return run_status(&config_path);
        }
        _ => {}
    }

    let config_path = cli.config.unwrap_or_else(find_config_path);
    let config = load_config(&config_path)?;
    let invoker = create_invoker(&config)?;

    match cli.command {
        Commands::Run { task, json } => {
            let pipeline = Pipeline::from_config(invoker, &config.pipeline);
            let outcome = pipeline.run(&task).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome_json(&outcome))?);
            } else {
                print_outcome(&outcome);
            }
        }
        Commands::Classify { task } => {
            let task = TaskRequest::new(&task, "cli")?;
            let classifier = Classifier::new(
                invoker,
                Duration::from_secs(config.pipeline.classify_timeout_secs),
            );
            let classification = classifier.classify(&task).await?;
            match classification.category {
                Some(category) => println!("{category}"),
                None => println!("(no matching category)"),
            }
        }
        Commands::Decompose { task } => {
            let task = TaskRequest::new(&task, "cli")?;
            let decomposer = Decomposer::new(
                invoker,
                Duration::from_secs(config.pipeline.decompose_timeout_secs),
            )
            .with_max_roles(config.pipeline.max_roles);
            let roles = decomposer.decompose(&task).await?;
            if roles.is_empty() {
                println!("(no roles)");
            }
            for (i, role) in roles.iter().enumerate() {
                println!("{}. {}", i + 1, role.role_name);
                println!("   {}", role.role_description);
            }
        }
        Commands::Interactive => {
            let pipeline = Pipeline::from_config(invoker, &config.pipeline);
            run_interactive(&pipeline).await?;
        }
        Commands::Onboard { .. } | Commands::Status => unreachable!(),
    }

    Ok(())
}

fn outcome_json(outcome: &PipelineOutcome) -> serde_json::Value {
    let kind = match outcome {
        PipelineOutcome::NoAction { .. } => "no_action",
        PipelineOutcome::Handled { .. } => "handled",
        PipelineOutcome::Report { .. } => "report",
    };
    serde_json::json!({
        "outcome": kind,
        "category": outcome.category(),
        "report": outcome.report(),
    })
}

fn print_outcome(outcome: &PipelineOutcome) {
    match outcome {
        PipelineOutcome::NoAction { category: None } => {
            println!("No matching category; nothing to do.");
        }
        PipelineOutcome::NoAction {
            category: Some(category),
        } => {
            println!("Classified as {category}, which is not handled.");
        }
        PipelineOutcome::Handled { category } => {
            println!("Classified as {category} ({}).", category.hint());
        }
        PipelineOutcome::Report { report, .. } => {
            render_markdown(&report.to_markdown());
        }
    }
}

async fn run_interactive(pipeline: &Pipeline) -> Result<()> {
    let history_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".relay");
    std::fs::create_dir_all(&history_dir)?;
    let history_path = history_dir.join("cli_history");

    let mut rl = DefaultEditor::new()?;
    let _ = rl.load_history(&history_path);

    println!("relay interactive mode (type /help for commands, Ctrl-D to quit)");
    println!();

    let result = loop {
        match rl.readline("task> ") {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(input);

                if matches!(input, "exit" | "quit" | "/exit" | "/quit" | ":q") {
                    break Ok(());
                }
                if input == "/help" {
                    println!("Type a task description to run it through the pipeline.");
                    println!("Categories:");
                    for c in Category::ALL {
                        println!("  {c:<22} {}", c.hint());
                    }
                    println!("  /quit  - Exit");
                    println!();
                    continue;
                }

                match pipeline.run(input).await {
                    Ok(outcome) => {
                        println!();
                        print_outcome(&outcome);
                        println!();
                    }
                    Err(e) => {
                        eprintln!("Error: {e}");
                        println!();
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break Ok(());
            }
            Err(err) => {
                eprintln!("Error: {err}");
                break Ok(());
            }
        }
    };

    let _ = rl.save_history(&history_path);
    result
}

fn resolve_api_key(
    provider_cfg: &Option<relay_config::ProviderConfig>,
    env_var: &str,
) -> Option<String> {
    provider_cfg
        .as_ref()
        .and_then(|c| c.api_key.clone())
        .filter(|k| !k.is_empty())
        .or_else(|| std::env::var(env_var).ok().filter(|k| !k.is_empty()))
}

fn resolve_api_base(provider_cfg: &Option<relay_config::ProviderConfig>) -> Option<String> {
    provider_cfg
        .as_ref()
        .and_then(|c| c.api_base.clone())
        .filter(|b| !b.is_empty())
}

/// Create a completion model for a specific provider + model combination.
///
/// Errors clearly if provider is unknown or has no API key.
#[allow(deprecated)]
fn create_model_for(
    provider: &str,
    model_name: &str,
    config: &Config,
) -> Result<CompletionModelHandle<'static>> {
    if provider.is_empty() {
        anyhow::bail!("No provider configured.\nValid providers: {VALID_PROVIDERS}");
    }

    if model_name.is_empty() {
        anyhow::bail!("No model configured for provider '{provider}'.");
    }

    match provider {
        "anthropic" => {
            let key = resolve_api_key(&config.providers.anthropic, "ANTHROPIC_API_KEY")
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "Anthropic provider selected but no API key found. \
                     Set providers.anthropic.apiKey in the config or ANTHROPIC_API_KEY env var."
                    )
                })?;
            let client: anthropic::Client = anthropic::Client::builder()
                .api_key(&key)
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create Anthropic client: {e}"))?;
            let model = client.completion_model(model_name);
            tracing::info!("Using Anthropic provider with model '{model_name}'");
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        "openai" => {
            let key =
                resolve_api_key(&config.providers.openai, "OPENAI_API_KEY").ok_or_else(|| {
                    anyhow::anyhow!(
                        "OpenAI provider selected but no API key found. \
                     Set providers.openai.apiKey in the config or OPENAI_API_KEY env var."
                    )
                })?;
            let mut builder = openai::CompletionsClient::builder().api_key(&key);
            if let Some(ref base) = resolve_api_base(&config.providers.openai) {
                builder = builder.base_url(base);
                tracing::info!("Using OpenAI provider with custom base: {base}");
            }
            let client: openai::CompletionsClient = builder
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create OpenAI client: {e}"))?;
            let model = client.completion_model(model_name);
            tracing::info!("Using OpenAI provider with model '{model_name}'");
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        "ollama" => {
            let mut builder = ollama::Client::builder().api_key(Nothing);
            if let Some(ref base) = resolve_api_base(&config.providers.ollama) {
                builder = builder.base_url(base);
            }
            let client: ollama::Client = builder
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create Ollama client: {e}"))?;
            let model = client.completion_model(model_name);
            tracing::info!("Using Ollama provider with model '{model_name}'");
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        "openrouter" => {
            let key = resolve_api_key(&config.providers.openrouter, "OPENROUTER_API_KEY")
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "OpenRouter provider selected but no API key found. \
                     Set providers.openrouter.apiKey in the config or OPENROUTER_API_KEY env var."
                    )
                })?;
            let client: openrouter::Client = openrouter::Client::new(&key)
                .map_err(|e| anyhow::anyhow!("Failed to create OpenRouter client: {e}"))?;
            let model = client.completion_model(model_name);
            tracing::info!("Using OpenRouter provider with model '{model_name}'");
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        "deepseek" => {
            let key = resolve_api_key(&config.providers.deepseek, "DEEPSEEK_API_KEY").ok_or_else(
                || {
                    anyhow::anyhow!(
                        "DeepSeek provider selected but no API key found. \
                     Set providers.deepseek.apiKey in the config or DEEPSEEK_API_KEY env var."
                    )
                },
            )?;
            let client: deepseek::Client = deepseek::Client::new(&key)
                .map_err(|e| anyhow::anyhow!("Failed to create DeepSeek client: {e}"))?;
            let model = client.completion_model(model_name);
            tracing::info!("Using DeepSeek provider with model '{model_name}'");
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        other => {
            anyhow::bail!("Unknown provider '{other}'. Valid providers: {VALID_PROVIDERS}");
        }
    }
}

/// Build a ModelPool from `agents.models`. A "default" entry is required;
/// every other tier is optional and falls back to it.
fn create_model_pool(config: &Config) -> Result<ModelPool> {
    let Some(default) = config.agents.models.get("default") else {
        anyhow::bail!(
            "No models configured. Set agents.models in the config with at least a \"default\" entry.\n\
             Example:\n  \
             \"models\": {{ \"default\": {{ \"provider\": \"ollama\", \"model\": \"llama3\" }} }}"
        );
    };

    let handle = create_model_for(&default.provider, &default.model, config)
        .map_err(|e| anyhow::anyhow!("Failed to create model for tier 'default': {e}"))?;
    let mut pool = ModelPool::new(handle, default.model.clone());

    for (tier, model_ref) in &config.agents.models {
        if tier == "default" {
            continue;
        }
        let handle = create_model_for(&model_ref.provider, &model_ref.model, config)
            .map_err(|e| anyhow::anyhow!("Failed to create model for tier '{tier}': {e}"))?;
        tracing::info!(
            "Model tier '{tier}': {} / {}",
            model_ref.provider,
            model_ref.model
        );
        pool = pool.with_tier(tier, handle, model_ref.model.clone());
    }

    Ok(pool)
}

fn create_invoker(config: &Config) -> Result<Arc<dyn ModelInvoker>> {
    let pool = create_model_pool(config)?;
    let defaults = &config.agents.defaults;
    Ok(Arc::new(RigInvoker::new(
        pool,
        f64::from(defaults.temperature),
        u64::from(defaults.max_tokens),
    )))
}

fn prompt_with_default(prompt: &str, default: &str) -> Result<String> {
    use std::io::{self, Write};
    print!("{prompt} [{default}]: ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let trimmed = input.trim();
    if trimmed.is_empty() {
        Ok(default.to_string())
    } else {
        Ok(trimmed.to_string())
    }
}

/// Write a default config file.
fn run_onboard(config_arg: Option<PathBuf>, non_interactive: bool) -> Result<()> {
    let config_path = match config_arg {
        Some(path) => path,
        None => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".relay")
            .join("config.json"),
    };
    if config_path.exists() {
        println!("Config already exists: {}", config_path.display());
        println!("To reset, delete it and run `relay onboard` again.");
        return Ok(());
    }

    let mut default_model = ModelRef {
        provider: "openai".into(),
        model: "gpt-4o-mini".into(),
    };
    if !non_interactive {
        println!("Interactive setup");
        default_model.provider = prompt_with_default("Default provider", &default_model.provider)?;
        default_model.model = prompt_with_default("Default model", &default_model.model)?;
    }

    let mut cfg = Config::default();
    cfg.agents.models.insert("default".into(), default_model);
    save_config(&config_path, &cfg)?;
    println!("Created config: {}", config_path.display());

    println!();
    println!("Next steps:");
    println!(
        "  1. Edit {} to set API keys or per-tier models (router, master, role)",
        config_path.display()
    );
    println!("  2. Run `relay run \"<task>\"` or `relay interactive`");
    Ok(())
}

fn run_status(config_path: &Path) -> Result<()> {
    println!("relay status");
    println!();

    if config_path.exists() {
        println!("  Config:    {} (found)", config_path.display());
    } else {
        println!(
            "  Config:    {} (not found, run `relay onboard`)",
            config_path.display()
        );
        return Ok(());
    }

    let config = load_config(config_path)?;

    if config.agents.models.is_empty() {
        println!("  Models:    (none configured)");
    } else {
        println!("  Models:");
        let mut tiers: Vec<_> = config.agents.models.iter().collect();
        tiers.sort_by(|a, b| a.0.cmp(b.0));
        for (tier, model_ref) in tiers {
            println!(
                "    {tier:<8} {} / {}",
                model_ref.provider, model_ref.model
            );
        }
        for tier in ["router", "master", "role"] {
            if !config.agents.models.contains_key(tier) {
                println!("    {tier:<8} (uses default)");
            }
        }
    }

    let providers = [
        ("anthropic", &config.providers.anthropic, "ANTHROPIC_API_KEY"),
        ("openai", &config.providers.openai, "OPENAI_API_KEY"),
        ("openrouter", &config.providers.openrouter, "OPENROUTER_API_KEY"),
        ("deepseek", &config.providers.deepseek, "DEEPSEEK_API_KEY"),
    ];
    println!("  API keys:");
    for (name, cfg, env_var) in providers {
        let state = if resolve_api_key(cfg, env_var).is_some() {
            "set"
        } else {
            "not set"
        };
        println!("    {name:<10} {state}");
    }

    let p = &config.pipeline;
    println!("  Pipeline:");
    println!(
        "    timeouts   classify {}s, decompose {}s, role {}s",
        p.classify_timeout_secs, p.decompose_timeout_secs, p.role_timeout_secs
    );
    println!("    roles      {} concurrent", p.max_concurrent_roles);
    if p.max_roles > 0 {
        println!("    max roles  {}", p.max_roles);
    }
    println!("    streaming  {}", p.streaming);

    Ok(())
}
