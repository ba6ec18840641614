#![warn(
    clippy::pedantic,
    clippy::nursery,
    clippy::style,
    clippy::unwrap_used,
    clippy::expect_used
)]

use std::{path::PathBuf, time::Duration};

use achievement_sync::{
    importer::{self, SyncOptions},
    partner::{Sdk, DEFAULT_API_URL},
};
use anyhow::Context;
use clap::{builder::BoolishValueParser, Parser};

/// Creates, updates and uploads icons for achievements on every listed app.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Achievement definitions (`{"data": [...]}`)
    definitions: PathBuf,
    /// Directory holding the icons named in the definitions
    images_dir: PathBuf,
    /// Target applications (`{"steam_apps": [...]}`)
    apps: PathBuf,
    /// Browser cookie text containing `sessionid=...;`
    cookie: PathBuf,

    /// Delete every achievement of each app instead of syncing
    #[arg(long, env = "DELETE_ALL_MODE", value_parser = BoolishValueParser::new())]
    delete_all: bool,

    /// Do not touch achievements that already exist
    #[arg(long, env = "SKIP_EXISTING", value_parser = BoolishValueParser::new())]
    skip_existing: bool,

    /// Log every response body and icon digest
    #[arg(long, env = "DEBUG", value_parser = BoolishValueParser::new())]
    debug: bool,

    #[arg(long, env = "PARTNER_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Per-request timeout
    #[arg(long, env = "PARTNER_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Retries for server errors, 0 fails on the first one
    #[arg(long, env = "PARTNER_MAX_RETRIES", default_value_t = 0)]
    max_retries: usize,
}

/// `--debug` wins over whatever `RUST_LOG` says about this crate.
fn log_builder(env: env_logger::Env<'_>, debug: bool) -> env_logger::Builder {
    let mut builder = env_logger::Builder::from_env(env);

    if debug {
        builder.filter_module("achievement_sync", log::LevelFilter::Debug);
    }

    builder
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Env-backed flags may live in an optional .env file.
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let level = if args.debug { "debug" } else { "info" };
    log_builder(
        env_logger::Env::default().default_filter_or(format!("warn,achievement_sync={level}")),
        args.debug,
    )
    .init();

    let definitions = importer::load_definitions(&args.definitions).await?;
    let apps = importer::load_apps(&args.apps).await?;
    let cookie = importer::load_cookie(&args.cookie).await?;

    let mut sdk = Sdk::new(
        &args.api_url,
        "AchievementSync/0.1",
        &cookie,
        args.timeout_secs.map(Duration::from_secs),
    )
    .context("Invalid cookie file")?;
    sdk.set_max_retries(args.max_retries);

    let options = SyncOptions {
        delete_all: args.delete_all,
        skip_existing: args.skip_existing,
    };

    let report = importer::sync_apps(&sdk, &apps, &definitions, &args.images_dir, options).await?;

    log::info!(
        "All achievements processed: {} created, {} updated, {} skipped, {} deleted, {} images uploaded",
        report.created,
        report.updated,
        report.skipped,
        report.deleted,
        report.images_uploaded
    );

    Ok(())
}
