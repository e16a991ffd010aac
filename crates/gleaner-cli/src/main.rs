use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use gleaner_client::FeedSelectors;
use gleaner_core::audit::{audit, export_annotations};
use gleaner_core::{ArtifactStore, RunConfig};

const LOG_FILE: &str = "metadata.csv";
#[cfg(feature = "browser")]
const SNAPSHOT_FILE: &str = "debug_snapshot.html";

#[derive(Parser)]
#[command(name = "gleaner", version, about = "Feed harvester with quality and vision filters")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk the search feed and collect notes that pass the filters
    #[cfg(feature = "browser")]
    Harvest {
        /// JSON run configuration. Missing file means defaults.
        #[arg(short, long, default_value = "app_config.json")]
        config: PathBuf,

        /// Directory holding the record log and the note_<i> directories
        #[arg(short, long, default_value = "collected")]
        output: PathBuf,

        /// Search keyword (overrides the config file)
        #[arg(short, long)]
        keyword: Option<String>,

        /// Number of notes to accept (overrides the config file)
        #[arg(short, long)]
        target: Option<u64>,

        /// Start from this feed URL instead of the keyword search page
        #[arg(long)]
        feed_url: Option<String>,

        /// Vision classifier API key (falls back to DASHSCOPE_API_KEY)
        #[arg(long, env = "GLEANER_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Vision model name
        #[arg(long, env = "GLEANER_MODEL", default_value = gleaner_client::vision::DEFAULT_MODEL)]
        model: String,

        /// OpenAI-compatible API base URL
        #[arg(long, env = "GLEANER_BASE_URL", default_value = gleaner_client::vision::DEFAULT_BASE_URL)]
        base_url: String,

        /// Persistent browser profile directory (reuses a logged-in session)
        #[arg(long, env = "GLEANER_PROFILE_DIR")]
        profile_dir: Option<PathBuf>,

        /// Show the browser window
        #[arg(long, default_value_t = false)]
        headful: bool,
    },

    /// Check the record log against the artifact directories
    Verify {
        #[arg(short, long, default_value = "collected")]
        output: PathBuf,
    },

    /// Write an annotations JSON keyed by media file name
    Export {
        #[arg(short, long, default_value = "collected")]
        output: PathBuf,

        /// Destination file
        #[arg(long, default_value = "annotations.json")]
        to: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("gleaner_core=info".parse()?)
                .add_directive("gleaner_client=info".parse()?)
                .add_directive("gleaner=info".parse()?),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        #[cfg(feature = "browser")]
        Commands::Harvest {
            config,
            output,
            keyword,
            target,
            feed_url,
            api_key,
            model,
            base_url,
            profile_dir,
            headful,
        } => {
            let (mut run_config, selectors) = load_config(&config)?;
            if let Some(keyword) = keyword {
                run_config.keyword = keyword;
            }
            if let Some(target) = target {
                run_config.target_count = target;
            }
            run_config
                .validate()
                .map_err(|e| anyhow::anyhow!(e))
                .context("Invalid run configuration")?;

            let api_key = api_key.or_else(|| std::env::var("DASHSCOPE_API_KEY").ok());
            let options = harvest::HarvestOptions {
                output,
                feed_url,
                api_key,
                model,
                base_url,
                profile_dir,
                headful,
            };
            harvest::cmd_harvest(run_config, selectors, options).await?;
        }
        Commands::Verify { output } => cmd_verify(&output)?,
        Commands::Export { output, to } => cmd_export(&output, &to)?,
    }

    Ok(())
}

#[derive(Deserialize, Default)]
struct SelectorSection {
    #[serde(default)]
    selectors: FeedSelectors,
}

/// Read the run configuration, falling back to defaults when the file is absent.
fn load_config(path: &Path) -> Result<(RunConfig, FeedSelectors)> {
    if !path.exists() {
        tracing::info!("{} not found, using defaults", path.display());
        return Ok((RunConfig::default(), FeedSelectors::default()));
    }

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: RunConfig = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid JSON in config file: {}", path.display()))?;
    let section: SelectorSection =
        serde_json::from_str(&raw).context("Invalid selectors in config file")?;

    Ok((config, section.selectors))
}

fn cmd_verify(output: &Path) -> Result<()> {
    let artifacts = ArtifactStore::new(output);
    let report =
        audit(&output.join(LOG_FILE), &artifacts).map_err(|e| anyhow::anyhow!(e))?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_consistent() {
        anyhow::bail!("{} is inconsistent with its record log", output.display());
    }
    tracing::info!(records = report.records, "Record log and artifacts agree");
    Ok(())
}

fn cmd_export(output: &Path, to: &Path) -> Result<()> {
    let artifacts = ArtifactStore::new(output);
    let annotations = export_annotations(&output.join(LOG_FILE), &artifacts)
        .map_err(|e| anyhow::anyhow!(e))?;

    let json = serde_json::to_string_pretty(&annotations)?;
    std::fs::write(to, json).with_context(|| format!("Failed to write {}", to.display()))?;

    tracing::info!(entries = annotations.len(), "Wrote {}", to.display());
    Ok(())
}

#[cfg(feature = "browser")]
mod harvest {
    use std::path::PathBuf;

    use anyhow::{Context, Result};
    use tokio_util::sync::CancellationToken;

    use gleaner_client::browser::DEFAULT_SITE;
    use gleaner_client::{
        BrowserOptions, ChromiumFeedDriver, FeedSelectors, NoteExtractor, OpenAiClassifier,
        ReqwestMediaFetcher, search_url,
    };
    use gleaner_core::traits::NullClassifier;
    use gleaner_core::{
        ArtifactStore, Classifier, CsvRecordLog, Harvester, RunConfig, StopReason,
        TracingHarvestReporter,
    };

    use super::{LOG_FILE, SNAPSHOT_FILE};

    pub struct HarvestOptions {
        pub output: PathBuf,
        pub feed_url: Option<String>,
        pub api_key: Option<String>,
        pub model: String,
        pub base_url: String,
        pub profile_dir: Option<PathBuf>,
        pub headful: bool,
    }

    pub async fn cmd_harvest(
        mut config: RunConfig,
        selectors: FeedSelectors,
        options: HarvestOptions,
    ) -> Result<()> {
        let classifier = match options.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            Some(key) => Some(
                OpenAiClassifier::with_base_url(key, &options.model, &options.base_url)
                    .and_then(|c| c.with_timeout(config.classify_timeout()))
                    .map_err(|e| anyhow::anyhow!(e))
                    .context("Failed to create classifier client")?,
            ),
            None => {
                if config.use_classification_filter {
                    tracing::warn!(
                        "No API key (GLEANER_API_KEY / DASHSCOPE_API_KEY); vision filter disabled"
                    );
                    config.use_classification_filter = false;
                }
                None
            }
        };

        tracing::info!(
            keyword = %config.keyword,
            target = config.target_count,
            text_filter = config.text_filter_enabled(),
            resolution_filter = config.resolution_filter_enabled(),
            vision_filter = config.use_classification_filter,
            "Starting harvest"
        );

        match classifier {
            Some(c) => run(config, selectors, options, c).await,
            None => run(config, selectors, options, NullClassifier).await,
        }
    }

    async fn run<C: Classifier>(
        config: RunConfig,
        selectors: FeedSelectors,
        options: HarvestOptions,
        classifier: C,
    ) -> Result<()> {
        let feed_url = match &options.feed_url {
            Some(url) => url.clone(),
            None => search_url(DEFAULT_SITE, &config.keyword).map_err(|e| anyhow::anyhow!(e))?,
        };

        let store = CsvRecordLog::open(&options.output.join(LOG_FILE))
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to open record log")?;
        let artifacts = ArtifactStore::new(&options.output);

        let fetcher = ReqwestMediaFetcher::with_timeout(&config.referer, config.fetch_timeout())
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to create HTTP client")?;

        let extractor = NoteExtractor::new(&selectors).map_err(|e| anyhow::anyhow!(e))?;
        let browser_options = BrowserOptions {
            headless: !options.headful,
            user_data_dir: options.profile_dir.clone(),
            navigation_timeout: config.navigation_timeout(),
            ..BrowserOptions::default()
        };

        tracing::info!("Opening {}", feed_url);
        let driver = ChromiumFeedDriver::launch(&feed_url, extractor, browser_options)
            .await
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to start browser")?;

        let cancel_token = CancellationToken::new();
        let ctrl_c_token = cancel_token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, stopping after the current note");
                ctrl_c_token.cancel();
            }
        });

        let mut harvester = Harvester::new(driver, fetcher, classifier, store, artifacts, config)
            .with_snapshot_path(options.output.join(SNAPSHOT_FILE));
        let summary = harvester.run(cancel_token, &TracingHarvestReporter).await;

        println!("{}", summary.tally());

        if let StopReason::Fatal(message) = summary.stop_reason {
            anyhow::bail!("Harvest aborted: {message}");
        }
        Ok(())
    }
}
