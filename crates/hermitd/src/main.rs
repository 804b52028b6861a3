//! hermitd — the Hermit daemon.
//!
//! Assembles the pieces: task store, master transport, scheduler, and
//! driver, then runs until Ctrl-C or a fatal driver error.
//!
//! # Usage
//!
//! ```text
//! hermitd --config /etc/hermit/hermitd.toml
//! hermitd --master-url http://master:5050
//! ```

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use hermit_driver::{Caller, FrameworkInfo, HttpTransport};
use hermit_scheduler::{Scheduler, SchedulerConfig};
use hermit_store::{EmbeddedStore, TaskStore};

use config::{Config, DatabaseDriver};

#[derive(Parser)]
#[command(name = "hermitd", about = "Hermit batch-task scheduler daemon")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Master URL, e.g. http://master:5050. Overrides the config file.
    #[arg(long)]
    master_url: Option<String>,

    /// Log filter, e.g. info or hermit=debug. Overrides the config file.
    #[arg(long)]
    loglevel: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(master_url) = cli.master_url {
        config.master_url = master_url;
    }
    if let Some(loglevel) = cli.loglevel {
        config.loglevel = loglevel;
    }
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.loglevel.parse().expect("invalid log filter")),
        )
        .init();

    info!(master = %config.master_url, "hermitd starting");

    let store = open_store(&config)?;
    let credentials = config.credentials()?;
    if credentials.is_some() {
        info!("authenticating with credentials");
    }

    let transport = Arc::new(
        HttpTransport::new(&config.master_url, credentials.clone())
            .context("building master transport")?,
    );
    let caller = Arc::new(Caller::new(transport.clone()));

    let scheduler = Arc::new(Scheduler::new(
        store,
        caller,
        SchedulerConfig {
            max_queue_size: config.max_queue_size,
        },
    ));

    let framework = FrameworkInfo {
        id: config.framework_id.clone(),
        name: config.name.clone(),
        user: config.user.clone(),
        checkpoint: config.checkpoint,
        failover_timeout: config.failover_timeout,
        principal: credentials.map(|c| c.principal),
    };

    // Ctrl-C → orderly stop; the driver loop then returns.
    let stopper = scheduler.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            stopper.stop();
        }
    });

    let result = scheduler.run(transport, framework).await;
    if let Err(e) = &result {
        warn!(error = %e, "scheduler exited with error");
    }
    info!("hermitd stopped");
    result.map_err(Into::into)
}

fn open_store(config: &Config) -> anyhow::Result<Arc<dyn TaskStore>> {
    match config.database_driver {
        DatabaseDriver::EmbeddedFile => {
            let store = EmbeddedStore::open(Path::new(&config.database_path))
                .with_context(|| format!("opening task store at {}", config.database_path))?;
            info!(path = %config.database_path, "embedded task store opened");
            Ok(Arc::new(store))
        }
        DatabaseDriver::CoordinationTree => {
            // The tree backend needs a coordination-service client bound
            // through hermit_store::TreeStore by the embedding build.
            anyhow::bail!(
                "database_driver = \"coordination-tree\" requires a coordination client; \
                 this build ships the embedded-file driver only"
            )
        }
    }
}
