use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use errata_core::backend::openai::{OpenAiCompatible, Provider};
use errata_core::dataset::{self, DatasetSource};
use errata_core::config_file::{self, ConfigFile};
use errata_core::{CompletionClient, Config, Credentials, ProgressEvent, normalize};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

mod output;

use output::ColorMode;

const DEFAULT_JUDGE_MODEL: &str = "openrouter/openai/gpt-4.1";

/// Errata - score LLM paper reviewers against annotated scientific errors
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Review a dataset slice with one model, judge the findings, and write CSV results
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Reviewer model id (e.g. openrouter/google/gemini-2.5-pro)
    #[arg(long)]
    reviewer_model: Option<String>,

    /// Judge model id [default: openrouter/openai/gpt-4.1]
    #[arg(long)]
    judge_model: Option<String>,

    /// Run index, used for output file names and shard selection
    #[arg(long, default_value_t = 0)]
    index: usize,

    /// Number of shards the dataset is split into
    #[arg(long, default_value_t = 1)]
    num_shards: usize,

    /// Dataset path (.json / .jsonl) or HTTP(S) URL
    #[arg(long)]
    dataset: String,

    /// Directory the result CSVs are written to
    #[arg(long, default_value = "results")]
    output_dir: PathBuf,

    /// API key for the reviewer provider
    #[arg(long)]
    reviewer_api_key: Option<String>,

    /// API key for the judge provider
    #[arg(long)]
    judge_api_key: Option<String>,

    /// Bearer token for downloading the dataset
    #[arg(long)]
    dataset_token: Option<String>,

    /// Reviewer attempts per paper before giving up
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Dry run: load and normalize the dataset, build prompts, print their sizes
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run(args).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Models and run configuration after applying CLI flags > env vars > config file > defaults.
struct Resolved {
    config: Config,
    reviewer_model: String,
    judge_model: String,
}

fn resolve(args: &RunArgs) -> anyhow::Result<Resolved> {
    resolve_with(args, config_file::load_config(), env_var)
}

/// API key for one role: the role flag, the role env var, the env var of the
/// provider `model` routes to, then the config file.
fn role_key(
    flag: &Option<String>,
    role_env: &str,
    model: &str,
    file_key: Option<String>,
    env: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    flag.clone()
        .or_else(|| env(role_env))
        .or_else(|| env(Provider::for_model(model).api_key_env()))
        .or(file_key)
}

fn resolve_with(
    args: &RunArgs,
    file: ConfigFile,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Resolved> {
    let models = file.models.clone().unwrap_or_default();
    let mut config = file.to_config();

    let reviewer_model = args
        .reviewer_model
        .clone()
        .or(models.reviewer)
        .context("no reviewer model given (use --reviewer-model or [models].reviewer)")?;
    let judge_model = args
        .judge_model
        .clone()
        .or(models.judge)
        .unwrap_or_else(|| DEFAULT_JUDGE_MODEL.to_string());

    let file_keys = config.credentials;
    config.credentials = Credentials {
        reviewer_api_key: role_key(
            &args.reviewer_api_key,
            "REVIEWER_API_KEY",
            &reviewer_model,
            file_keys.reviewer_api_key,
            &env,
        ),
        judge_api_key: role_key(
            &args.judge_api_key,
            "JUDGE_API_KEY",
            &judge_model,
            file_keys.judge_api_key,
            &env,
        ),
        dataset_token: args
            .dataset_token
            .clone()
            .or_else(|| env("HF_TOKEN"))
            .or(file_keys.dataset_token),
    };
    if let Some(n) = args.max_attempts {
        config.retry.max_attempts = n;
    }

    Ok(Resolved {
        config,
        reviewer_model,
        judge_model,
    })
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let Resolved {
        config,
        reviewer_model,
        judge_model,
    } = resolve(&args)?;
    tracing::debug!(
        ?config,
        reviewer_model = %reviewer_model,
        judge_model = %judge_model,
        "resolved configuration"
    );

    let color = ColorMode(!args.no_color);
    let mut writer = std::io::stdout();

    let source = DatasetSource::parse(&args.dataset);
    let rows = dataset::load_rows(
        &source,
        config.credentials.dataset_token.as_deref(),
        config.timeout(),
    )
    .await
    .with_context(|| format!("failed to load dataset from {}", source))?;
    let records = normalize::normalize(rows);
    let total = records.len();
    let records = dataset::select_shard(records, args.index, args.num_shards);
    writeln!(
        writer,
        "Loaded {} papers from {}; shard {}/{} has {}",
        total,
        source,
        args.index % args.num_shards.max(1),
        args.num_shards.max(1),
        records.len()
    )?;

    if args.dry_run {
        let sizes: Vec<usize> = records
            .iter()
            .map(|r| {
                errata_core::prompt::reviewer_prompt(r)
                    .iter()
                    .map(|m| m.content.chars().count())
                    .sum()
            })
            .collect();
        output::print_dry_run(&mut writer, &records, &sizes, color)?;
        return Ok(());
    }

    let reviewer_backend = OpenAiCompatible::new(
        config.endpoints.clone(),
        config.credentials.reviewer_api_key.clone(),
        config.timeout(),
    );
    let judge_backend = OpenAiCompatible::new(
        config.endpoints.clone(),
        config.credentials.judge_api_key.clone(),
        config.timeout(),
    );
    let reviewer = CompletionClient::new(Arc::new(reviewer_backend), config.retry);
    let judge = CompletionClient::new(Arc::new(judge_backend), config.retry)
        .with_batch_concurrency(config.judge_concurrency);

    let bar = ProgressBar::new(records.len() as u64);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {msg} [{bar:40.cyan/dim}] {pos}/{len} ({elapsed})",
        )?
        .progress_chars("=> "),
    );
    bar.set_message("reviewing");

    let progress_cb = {
        let bar = bar.clone();
        move |event: ProgressEvent| {
            let mut line = Vec::new();
            if output::print_progress(&mut line, &event, color).is_ok() && !line.is_empty() {
                bar.println(String::from_utf8_lossy(&line).trim_end());
            }
            match event {
                ProgressEvent::Reviewed { .. } => bar.inc(1),
                ProgressEvent::JudgeBatch { pending } => {
                    bar.set_length(pending as u64);
                    bar.set_position(0);
                    bar.set_message("judging");
                }
                ProgressEvent::Judged { .. } => bar.inc(1),
                _ => {}
            }
        }
    };

    let run = errata_core::run_evaluation(
        records,
        &reviewer,
        &reviewer_model,
        &judge,
        &judge_model,
        progress_cb,
    )
    .await;
    bar.finish_and_clear();

    let paths = errata_reporting::export_run(&run, &args.output_dir, &reviewer_model, args.index)
        .context("failed to write results")?;
    output::print_metrics_summary(&mut writer, &run.report, &paths, color)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use errata_core::config_file::{ApiKeysConfig, ModelsConfig};
    use std::collections::HashMap;

    fn run_args(extra: &[&str]) -> RunArgs {
        let argv = ["errata", "run", "--dataset", "papers.jsonl"]
            .into_iter()
            .chain(extra.iter().copied());
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Run(args) => args,
        }
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    fn file_with(reviewer_key: &str, judge_key: &str, reviewer_model: &str) -> ConfigFile {
        ConfigFile {
            api_keys: Some(ApiKeysConfig {
                reviewer_api_key: Some(reviewer_key.into()),
                judge_api_key: Some(judge_key.into()),
                dataset_token: Some("file-hf".into()),
            }),
            models: Some(ModelsConfig {
                reviewer: Some(reviewer_model.into()),
                judge: None,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn flags_beat_env_and_file() {
        let args = run_args(&[
            "--reviewer-model",
            "openrouter/google/gemini-2.5-pro",
            "--reviewer-api-key",
            "flag-r",
            "--dataset-token",
            "flag-hf",
            "--max-attempts",
            "2",
        ]);
        let env = env_of(&[
            ("REVIEWER_API_KEY", "env-r"),
            ("OPENROUTER_API_KEY", "env-or"),
            ("HF_TOKEN", "env-hf"),
        ]);
        let resolved = resolve_with(&args, file_with("file-r", "file-j", "o3"), env).unwrap();
        assert_eq!(resolved.reviewer_model, "openrouter/google/gemini-2.5-pro");
        let creds = &resolved.config.credentials;
        assert_eq!(creds.reviewer_api_key.as_deref(), Some("flag-r"));
        assert_eq!(creds.dataset_token.as_deref(), Some("flag-hf"));
        assert_eq!(resolved.config.retry.max_attempts, 2);
    }

    #[test]
    fn env_beats_file() {
        let args = run_args(&[]);
        let env = env_of(&[("REVIEWER_API_KEY", "env-r"), ("JUDGE_API_KEY", "env-j")]);
        let resolved = resolve_with(&args, file_with("file-r", "file-j", "o3"), env).unwrap();
        assert_eq!(resolved.reviewer_model, "o3");
        let creds = &resolved.config.credentials;
        assert_eq!(creds.reviewer_api_key.as_deref(), Some("env-r"));
        assert_eq!(creds.judge_api_key.as_deref(), Some("env-j"));
        assert_eq!(creds.dataset_token.as_deref(), Some("file-hf"));
    }

    #[test]
    fn default_judge_uses_openrouter_key() {
        let args = run_args(&["--reviewer-model", "openrouter/anthropic/claude-sonnet-4"]);
        let env = env_of(&[("OPENROUTER_API_KEY", "or-key")]);
        let resolved = resolve_with(&args, ConfigFile::default(), env).unwrap();
        assert_eq!(resolved.judge_model, DEFAULT_JUDGE_MODEL);
        let creds = &resolved.config.credentials;
        assert_eq!(creds.judge_api_key.as_deref(), Some("or-key"));
        assert_eq!(creds.reviewer_api_key.as_deref(), Some("or-key"));
    }

    #[test]
    fn provider_key_follows_each_model() {
        let args = run_args(&[
            "--reviewer-model",
            "o3",
            "--judge-model",
            "openrouter/openai/gpt-4.1",
        ]);
        let env = env_of(&[("OPENAI_API_KEY", "oa-key"), ("OPENROUTER_API_KEY", "or-key")]);
        let resolved = resolve_with(&args, ConfigFile::default(), env).unwrap();
        let creds = &resolved.config.credentials;
        assert_eq!(creds.reviewer_api_key.as_deref(), Some("oa-key"));
        assert_eq!(creds.judge_api_key.as_deref(), Some("or-key"));
    }

    #[test]
    fn provider_env_beats_file_key() {
        let args = run_args(&["--reviewer-model", "openai/gpt-4.1"]);
        let env = env_of(&[("OPENAI_API_KEY", "oa-key")]);
        let resolved = resolve_with(&args, file_with("file-r", "file-j", "o3"), env).unwrap();
        assert_eq!(
            resolved.config.credentials.reviewer_api_key.as_deref(),
            Some("oa-key")
        );
    }

    #[test]
    fn file_key_is_last_resort() {
        let args = run_args(&[]);
        let resolved =
            resolve_with(&args, file_with("file-r", "file-j", "o3"), env_of(&[])).unwrap();
        let creds = &resolved.config.credentials;
        assert_eq!(creds.reviewer_api_key.as_deref(), Some("file-r"));
        assert_eq!(creds.judge_api_key.as_deref(), Some("file-j"));
    }

    #[test]
    fn missing_reviewer_model_is_an_error() {
        let err = resolve_with(&run_args(&[]), ConfigFile::default(), env_of(&[]))
            .err()
            .unwrap();
        assert!(err.to_string().contains("no reviewer model given"));
    }
}
