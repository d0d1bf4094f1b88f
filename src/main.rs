use anyhow::{bail, Context, Result};
use autoapply_webdriver::config::{default_pattern_store_path, EngineConfig, Profile};
use autoapply_webdriver::{
    BatchScheduler, ChromeDriver, JsonRecordStore, MemoryRecordStore, PageAnalyzer,
    PatternRecord, PatternStore, RecordStore, RunBudget, WorkItem,
};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug)]
struct BrowserArgs {
    /// Engine config (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run Chrome without a window
    #[arg(long)]
    headless: bool,

    /// Pass --no-sandbox to Chrome (Linux AppArmor workaround)
    #[arg(long)]
    no_sandbox: bool,

    /// Path to the Chrome executable
    #[arg(long)]
    chrome_path: Option<String>,

    /// Attach to a Chrome already running with --remote-debugging-port
    #[arg(long)]
    debug_port: Option<u16>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a batch of targets and print the summary as JSON
    Run {
        /// Work items (JSON array)
        #[arg(short, long)]
        targets: PathBuf,

        /// Applicant profile (JSON)
        #[arg(short, long)]
        profile: PathBuf,

        /// Where to keep work items and outcomes (JSON)
        #[arg(long)]
        records: Option<PathBuf>,

        #[command(flatten)]
        browser: BrowserArgs,
    },
    /// Analyze one page and print the result as JSON
    Analyze {
        url: String,

        #[command(flatten)]
        browser: BrowserArgs,
    },
    /// List stored patterns
    Patterns {
        /// Pattern store file
        #[arg(long)]
        store: Option<PathBuf>,
    },
}

async fn load_config(browser: &BrowserArgs) -> Result<EngineConfig> {
    let mut config = match &browser.config {
        Some(path) => EngineConfig::from_file(path).await?,
        None => EngineConfig::default(),
    };
    config.browser.headless |= browser.headless;
    config.browser.no_sandbox |= browser.no_sandbox;
    if browser.chrome_path.is_some() {
        config.browser.chrome_path = browser.chrome_path.clone();
    }
    if browser.debug_port.is_some() {
        config.browser.debug_port = browser.debug_port;
    }
    Ok(config)
}

async fn launch(config: &EngineConfig) -> Result<Arc<ChromeDriver>> {
    log::info!("Launching Chrome...");
    let driver = ChromeDriver::from_settings(&config.browser, config.page_load_timeout())
        .await
        .context("Failed to start Chrome")?;
    if !driver.is_alive().await {
        bail!("Chrome started but is not responding");
    }
    Ok(Arc::new(driver))
}

/// Close a Chrome we launched. An attached browser belongs to the user and stays open.
async fn shutdown(driver: Arc<ChromeDriver>, config: &EngineConfig) {
    if config.browser.debug_port.is_some() {
        return;
    }
    match Arc::try_unwrap(driver) {
        Ok(driver) => {
            if let Err(e) = driver.close().await {
                log::warn!("Failed to close Chrome: {}", e);
            }
        }
        Err(_) => log::debug!("Chrome still in use, leaving it to drop"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::Run {
            targets,
            profile,
            records,
            browser,
        } => {
            let config = load_config(&browser).await?;
            let profile = Profile::from_file(&profile).await?;
            let content = tokio::fs::read_to_string(&targets)
                .await
                .with_context(|| format!("Failed to read targets {}", targets.display()))?;
            let items: Vec<WorkItem> = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse targets {}", targets.display()))?;

            let mut store = match &config.pattern_store_path {
                Some(path) => PatternStore::open(path).await?,
                None => PatternStore::in_memory(),
            };
            let records: Arc<dyn RecordStore> = match records {
                Some(path) => Arc::new(JsonRecordStore::open(path).await?),
                None => Arc::new(MemoryRecordStore::new()),
            };

            let driver = launch(&config).await?;
            let budget = RunBudget::from_config(&config);
            let scheduler =
                BatchScheduler::new(driver.clone(), Arc::new(profile), records, config.clone());

            let stop = scheduler.stop_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("Interrupt received, stopping after the current target");
                    stop.store(true, Ordering::SeqCst);
                }
            });

            let summary = scheduler.run(items, &mut store, budget).await;
            drop(scheduler);
            shutdown(driver, &config).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if summary.aborted {
                std::process::exit(2);
            }
        }
        Command::Analyze { url, browser } => {
            let config = load_config(&browser).await?;
            let driver = launch(&config).await?;
            let analyzer = PageAnalyzer::new(driver.clone(), &config);
            let analysis = analyzer.analyze(&url).await;
            drop(analyzer);
            shutdown(driver, &config).await;
            let analysis = analysis?;
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
        Command::Patterns { store } => {
            let path = store
                .or_else(default_pattern_store_path)
                .context("No pattern store path and no data directory")?;
            let store = PatternStore::open(&path).await?;
            let records = store
                .patterns()
                .into_iter()
                .map(PatternRecord::from_pattern)
                .collect::<Result<Vec<_>>>()?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
    }

    Ok(())
}
