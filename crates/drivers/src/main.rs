mod config;
mod http;
mod logging;
mod wiring;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use config::{AppConfig, Cli, Command};
use homecloud_adapters::{present_index_report, present_search_results, present_sync_row};
use homecloud_application::{
    ApplicationService, BootstrapCatalogCommand, IndexDataDirCommand, RetryBackupsCommand,
    SearchCommand, SyncStatusQuery,
};
use homecloud_domain::{Page, SearchFilters};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use wiring::{build_components, Components};

fn main() -> ExitCode {
    logging::init_logging();
    let cli = Cli::parse();

    let config = match AppConfig::from_settings(cli.settings) {
        Ok(config) => config,
        Err(error) => {
            error!("invalid configuration: {error:#}");
            return ExitCode::from(1);
        }
    };

    let components = build_components(&config);
    if let Err(error) = components.service.bootstrap_catalog(BootstrapCatalogCommand) {
        error!(
            %error,
            database = %config.database_path.display(),
            "failed to open metadata store"
        );
        return ExitCode::from(1);
    }

    let command = cli.command.unwrap_or(Command::Serve);
    match run_command(command, &components, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{error:#}");
            ExitCode::from(1)
        }
    }
}

fn run_command(
    command: Command,
    components: &Components,
    config: &AppConfig,
) -> anyhow::Result<()> {
    match command {
        Command::Serve => serve(components, config),
        Command::Index => {
            components.start_workers(config);
            let report = components
                .service
                .index_data_dir(IndexDataDirCommand)
                .context("index failed")?;
            components.drain_workers();
            println!("{}", present_index_report(&report));
            Ok(())
        }
        Command::Search {
            query,
            regex,
            semantic,
            limit,
            offset,
            mime,
            date_from,
            date_to,
        } => {
            let results = components
                .service
                .search(SearchCommand {
                    query: query.unwrap_or_default(),
                    page: Page::new(limit, offset),
                    filters: SearchFilters::parse(
                        mime.as_deref(),
                        date_from.as_deref(),
                        date_to.as_deref(),
                    ),
                    regex,
                    semantic,
                })
                .context("search failed")?;
            for line in present_search_results(&results) {
                println!("{line}");
            }
            Ok(())
        }
        Command::SyncStatus { device_id } => {
            let records = components
                .service
                .sync_status(SyncStatusQuery { device_id })
                .context("sync status failed")?;
            if records.is_empty() {
                println!("no synced media");
            }
            for record in &records {
                println!("{}", present_sync_row(record));
            }
            Ok(())
        }
    }
}

fn serve(components: &Components, config: &AppConfig) -> anyhow::Result<()> {
    components.start_workers(config);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building async runtime")?;

    runtime.block_on(async {
        spawn_background_index(components.service.clone());
        spawn_backup_retry(components.service.clone(), config.backup_retry_interval);
        http::serve(config.bind_addr, http::AppState::new(components.service.clone())).await
    })
}

fn spawn_background_index(service: Arc<ApplicationService>) {
    tokio::task::spawn_blocking(move || {
        if let Err(error) = service.index_data_dir(IndexDataDirCommand) {
            warn!(%error, "startup index failed");
        }
    });
}

fn spawn_backup_retry(service: Arc<ApplicationService>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(period_secs = period.as_secs(), "backup retry scheduler started");
        loop {
            ticker.tick().await;
            let service = service.clone();
            match tokio::task::spawn_blocking(move || {
                service.retry_pending_backups(RetryBackupsCommand)
            })
            .await
            {
                Ok(Ok(queued)) => debug!(queued, "backup retry scan finished"),
                Ok(Err(error)) => warn!(%error, "backup retry scan failed"),
                Err(error) => warn!(%error, "backup retry scan panicked"),
            }
        }
    });
}
