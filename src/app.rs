use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dirs::home_dir;
use tracing::{info, warn};

use crate::accounts::AccountManager;
use crate::cli::{Cli, Command};
use crate::config::EmailConfig;
use crate::context::CallContext;
use crate::poller::Poller;
use crate::storage::{OpStateStore, DB_FILE_NAME};

const CONFIG_FILE_NAME: &str = "config.toml";

pub async fn run(cli: Cli) -> Result<()> {
    let db_path = match cli.db.clone() {
        Some(path) => path,
        None => default_data_dir()?.join(DB_FILE_NAME),
    };
    let store = OpStateStore::open(&db_path)
        .await
        .with_context(|| format!("opening op-state store at {}", db_path.display()))?;
    info!(path = %db_path.display(), "Using SQLite op-state store");

    let ctx = CallContext::new().with_timeout(Duration::from_secs(cli.timeout_secs));
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            interrupt.cancel();
        }
    });

    let result = match &cli.command {
        Command::Poll => poll(&cli, &ctx, &store).await,
        Command::Folders { account } => folders(&cli, &ctx, account).await,
        Command::State { namespace } => state(&store, namespace).await,
    };

    store.close().await;
    result
}

async fn poll(cli: &Cli, ctx: &CallContext, store: &OpStateStore) -> Result<()> {
    let config = load_config(cli)?;
    let manager = Arc::new(AccountManager::new(&config)?);
    let poller = Poller::new(Arc::clone(&manager), store.clone());

    let outcome = poller.check_new_messages(ctx).await;
    manager.close().await;

    let summary = outcome.context("checking for new email")?;
    if summary.is_empty() {
        info!("No new email");
    } else {
        println!("{summary}");
    }
    Ok(())
}

async fn folders(cli: &Cli, ctx: &CallContext, account: &str) -> Result<()> {
    let config = load_config(cli)?;
    let manager = AccountManager::new(&config)?;
    let client = manager.account(account)?;

    let outcome = client.list_folders(ctx).await;
    manager.close().await;

    for folder in outcome.context("listing folders")? {
        if folder.selectable {
            println!("{:<40} {:>7} {:>7}", folder.name, folder.messages, folder.unseen);
        } else {
            println!("{:<40} {:>7} {:>7}", folder.name, "-", "-");
        }
    }
    Ok(())
}

async fn state(store: &OpStateStore, namespace: &str) -> Result<()> {
    let entries = store
        .list(namespace)
        .await
        .with_context(|| format!("listing namespace {namespace}"))?;
    for (key, value) in entries {
        println!("{key} = {value}");
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<EmailConfig> {
    let path = match (&cli.config, env::var("MAILWAKE_CONFIG")) {
        (Some(path), _) => path.clone(),
        (None, Ok(path)) => PathBuf::from(path),
        (None, Err(_)) => default_data_dir()?.join(CONFIG_FILE_NAME),
    };
    let config = EmailConfig::load(&path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    if config.accounts.is_empty() {
        warn!(path = %path.display(), "No email accounts configured");
    }
    Ok(config)
}

pub(crate) fn default_data_dir() -> Result<PathBuf> {
    if let Ok(custom) = env::var("MAILWAKE_DATA_DIR") {
        let path = PathBuf::from(custom);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("creating MAILWAKE_DATA_DIR at {}", path.display()))?;
        return Ok(path);
    }

    let home = home_dir().context("could not determine home directory")?;
    let path = home.join(".mailwake");
    std::fs::create_dir_all(&path)
        .with_context(|| format!("creating data directory {}", path.display()))?;
    Ok(path)
}
