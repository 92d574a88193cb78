use std::io::{IsTerminal, Write};
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use relatedlit_core::config_file::{
    CoCitationConfig, ConfigFile, RelatedConfig, SearchConfig, config_path, load_config,
    save_config,
};
use relatedlit_core::related::fetch_seed_references;
use relatedlit_core::{
    CoreError, InspireClient, InspireConfig, LiteratureSearch, ProgressEvent, RelatedOptions,
    select_anchors,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod output;

use output::ColorMode;

/// Related-literature finder - recommend papers through shared references and co-citation
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recommend records related to a seed record
    Related {
        /// Record id of the seed publication
        recid: String,

        #[command(flatten)]
        anchors: AnchorArgs,

        /// Citing records fetched per anchor
        #[arg(long)]
        per_anchor: Option<usize>,

        /// Maximum number of recommendations
        #[arg(long)]
        max_results: Option<usize>,

        /// Concurrent searches
        #[arg(long)]
        concurrency: Option<usize>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Show the anchors that would be searched for a seed record
    Anchors {
        /// Record id of the seed publication
        recid: String,

        #[command(flatten)]
        anchors: AnchorArgs,

        /// Print anchors as JSON
        #[arg(long)]
        json: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Also write it to the platform config file
        #[arg(long)]
        save: bool,
    },
}

#[derive(Args, Debug)]
struct AnchorArgs {
    /// Maximum number of seed references used as anchors
    #[arg(long)]
    max_anchors: Option<usize>,

    /// Allow review articles as anchors and results
    #[arg(long)]
    include_reviews: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config();

    match cli.command {
        Command::Related {
            recid,
            anchors,
            per_anchor,
            max_results,
            concurrency,
            json,
            no_color,
        } => {
            let mut options = resolve_options(&config, &anchors);
            if let Some(n) = per_anchor {
                options.per_anchor = n;
            }
            if let Some(n) = max_results {
                options.max_results = n;
            }
            if let Some(n) = concurrency {
                options.concurrency = n;
            }
            related(&config, &recid, options, json, no_color).await
        }
        Command::Anchors {
            recid,
            anchors,
            json,
            no_color,
        } => {
            let options = resolve_options(&config, &anchors);
            show_anchors(&config, &recid, &options, json, no_color).await
        }
        Command::Config { save } => show_config(&config, save),
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Environment variable lookup; tests and `config --save` pass a fake one.
type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn no_env(_: &str) -> Option<String> {
    None
}

/// Options from defaults, then the config file, then the environment, then flags.
fn resolve_options(config: &ConfigFile, args: &AnchorArgs) -> RelatedOptions {
    let mut options = file_options(config, &process_env);
    if let Some(n) = args.max_anchors {
        options.max_anchors = n;
    }
    if args.include_reviews {
        options.exclude_review_articles = false;
    }
    options
}

fn file_options(config: &ConfigFile, env: EnvLookup<'_>) -> RelatedOptions {
    let mut options = RelatedOptions::default();
    config.apply(&mut options);
    if let Some(n) = env("RELATEDLIT_CONCURRENCY").and_then(|v| v.parse().ok()) {
        options.concurrency = n;
    }
    options
}

fn inspire_config(config: &ConfigFile, env: EnvLookup<'_>) -> InspireConfig {
    let mut inspire = config.inspire_config();
    if let Some(url) = env("INSPIRE_BASE_URL")
        && !url.trim().is_empty()
    {
        inspire.base_url = url;
    }
    inspire
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_clone.cancel();
        }
    });
    cancel
}

fn use_color(no_color: bool) -> ColorMode {
    ColorMode(!no_color && std::io::stdout().is_terminal())
}

/// Report a cancelled run and exit with the conventional SIGINT status.
fn exit_cancelled() -> ! {
    eprintln!("Cancelled.");
    std::process::exit(130);
}

async fn related(
    config: &ConfigFile,
    recid: &str,
    options: RelatedOptions,
    json: bool,
    no_color: bool,
) -> anyhow::Result<()> {
    let inspire = inspire_config(config, &process_env);
    let client: Arc<dyn LiteratureSearch> = Arc::new(InspireClient::new(&inspire));
    let cancel = cancel_on_ctrl_c();

    let references = match fetch_seed_references(client.as_ref(), recid, &cancel).await {
        Ok(refs) => refs,
        Err(CoreError::Cancelled) => exit_cancelled(),
        Err(e) => return Err(e.into()),
    };
    tracing::info!(seed = recid, references = references.len(), "seed references loaded");
    if references.is_empty() {
        eprintln!("No references found for record {}.", recid);
    }

    let (tx, rx) = relatedlit_core::progress_channel();
    let progress = tokio::spawn(render_progress(rx));

    let outcome = relatedlit_core::fetch_related(
        client,
        recid,
        &references,
        &options,
        Some(tx),
        cancel,
    )
    .await;
    let _ = progress.await;

    let results = match outcome {
        Ok(results) => results,
        Err(e) if e.is_cancelled() => exit_cancelled(),
        Err(e) => return Err(e.into()),
    };

    let mut stdout = std::io::stdout().lock();
    if json {
        writeln!(stdout, "{}", serde_json::to_string_pretty(&results)?)?;
    } else {
        output::print_results(&mut stdout, recid, &results, use_color(no_color))?;
    }
    Ok(())
}

/// Drive a progress bar from the event stream until the sender is dropped.
async fn render_progress(rx: async_channel::Receiver<ProgressEvent>) {
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg} [{bar:40.cyan/dim}] {pos}/{len}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    let bar = ProgressBar::new(0);
    bar.set_style(style);
    bar.set_message("Selecting anchors");
    bar.enable_steady_tick(Duration::from_millis(120));

    while let Ok(event) = rx.recv().await {
        match event {
            ProgressEvent::AnchorsSelected { count } => {
                bar.set_length(count as u64);
                bar.set_message("Coupling");
            }
            ProgressEvent::Snapshot {
                processed_anchors,
                total_anchors,
                entries,
            } => {
                bar.set_length(total_anchors as u64);
                bar.set_position(processed_anchors as u64);
                if let Some(best) = entries.first() {
                    let title: String = best.title.chars().take(40).collect();
                    bar.set_message(format!("Coupling (best: {})", title));
                }
            }
            ProgressEvent::CoCitation { processed, total } => {
                bar.set_length(total as u64);
                bar.set_position(processed as u64);
                bar.set_message("Co-citation");
            }
        }
    }
    bar.finish_and_clear();
}

async fn show_anchors(
    config: &ConfigFile,
    recid: &str,
    options: &RelatedOptions,
    json: bool,
    no_color: bool,
) -> anyhow::Result<()> {
    let client = InspireClient::new(&inspire_config(config, &process_env));
    let cancel = cancel_on_ctrl_c();

    let references = match fetch_seed_references(&client, recid, &cancel).await {
        Ok(refs) => refs,
        Err(CoreError::Cancelled) => exit_cancelled(),
        Err(e) => return Err(e.into()),
    };
    let anchors = select_anchors(&references, options.max_anchors, &options.anchor_options());

    let mut stdout = std::io::stdout().lock();
    if json {
        writeln!(stdout, "{}", serde_json::to_string_pretty(&anchors)?)?;
    } else {
        output::print_anchors(&mut stdout, recid, &anchors, use_color(no_color))?;
    }
    Ok(())
}

/// The configuration in effect under `env`, every field filled in.
fn effective_config(config: &ConfigFile, env: EnvLookup<'_>) -> ConfigFile {
    let options = file_options(config, env);
    let inspire = inspire_config(config, env);
    ConfigFile {
        search: Some(SearchConfig {
            base_url: Some(inspire.base_url),
            timeout_secs: Some(inspire.timeout_secs),
            requests_per_window: Some(inspire.requests_per_window),
            window_secs: Some(inspire.window_secs),
        }),
        related: Some(RelatedConfig {
            max_anchors: Some(options.max_anchors),
            per_anchor: Some(options.per_anchor),
            max_results: Some(options.max_results),
            concurrency: Some(options.concurrency),
            exclude_review_articles: Some(options.exclude_review_articles),
            sweet_spot_min: Some(options.anchor_tuning.sweet_spot_min),
            sweet_spot_max: Some(options.anchor_tuning.sweet_spot_max),
            too_high: Some(options.anchor_tuning.too_high),
            target_citations: Some(options.anchor_tuning.target_citations),
        }),
        cocitation: Some(CoCitationConfig {
            enabled: Some(options.cocitation.enabled),
            budget: Some(options.cocitation.budget),
            min_seed_citing: Some(options.cocitation.min_seed_citing),
            max_weight: Some(options.cocitation.max_weight),
            saturation: Some(options.cocitation.saturation),
            score_scale: Some(options.cocitation.score_scale),
        }),
    }
}

/// Print the effective configuration. `--save` persists the file settings
/// only; environment overrides stay temporary.
fn show_config(config: &ConfigFile, save: bool) -> anyhow::Result<()> {
    if let Some(path) = config_path() {
        println!("# platform config: {}", path.display());
    }
    println!("# local override: .relatedlit.toml");
    print!("{}", toml::to_string_pretty(&effective_config(config, &process_env))?);

    if save {
        let path = save_config(&effective_config(config, &no_env))?;
        eprintln!("Saved configuration to {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_env(key: &str) -> Option<String> {
        match key {
            "RELATEDLIT_CONCURRENCY" => Some("9".into()),
            "INSPIRE_BASE_URL" => Some("http://localhost:8080".into()),
            _ => None,
        }
    }

    fn file() -> ConfigFile {
        ConfigFile {
            related: Some(RelatedConfig {
                concurrency: Some(3),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn environment_overrides_shown_config() {
        let shown = effective_config(&file(), &fake_env);
        assert_eq!(shown.related.unwrap().concurrency, Some(9));
        assert_eq!(
            shown.search.unwrap().base_url.as_deref(),
            Some("http://localhost:8080")
        );
    }

    #[test]
    fn saved_config_ignores_environment() {
        let saved = effective_config(&file(), &no_env);
        assert_eq!(saved.related.unwrap().concurrency, Some(3));
        assert_eq!(
            saved.search.unwrap().base_url.as_deref(),
            Some(relatedlit_core::search::inspire::DEFAULT_BASE_URL)
        );
    }

    #[test]
    fn blank_base_url_is_ignored() {
        let blank = |key: &str| (key == "INSPIRE_BASE_URL").then(|| "  ".to_string());
        let inspire = inspire_config(&ConfigFile::default(), &blank);
        assert_eq!(inspire, InspireConfig::default());
    }
}
