use clap::Parser;
use futures_util::future::try_join_all;
use log::{error, info, trace};
use serde_json::to_string_pretty;
use std::sync::Arc;
use tokio::task;
use wallet_storage_cli::cli_args::CliArgs;
use wallet_storage_cli::storage_config::StorageConfig;
use wallet_storage_database::client::WalletDbClient;
use wallet_storage_engine::fee::FeeCalculator;
use wallet_storage_engine::storage::TransactionStore;
use wallet_storage_engine::storage::postgres::PostgresStore;
use wallet_storage_engine::sweeper::sweeper;
use wallet_storage_signal::signal_handler::SignalHandler;

#[tokio::main]
async fn main() {
    println!();
    println!("**************************************************************");
    println!("*********************** Wallet Storage ***********************");
    println!("--------------------------------------------------------------");
    let cli_args = CliArgs::parse();
    configure_logging(&cli_args);

    trace!("{:?}", cli_args);
    info!("{} {}", env!("CARGO_PKG_NAME"), cli_args.version());

    let config = match &cli_args.config {
        Some(path) => StorageConfig::from_file(path).unwrap_or_else(|e| panic!("Invalid storage configuration: {e}")),
        None => StorageConfig::default(),
    };
    FeeCalculator::new(&config.fee_model).expect("Invalid fee model");
    info!("Storage config:\n{}", to_string_pretty(&config).expect("Unable to render storage config"));

    let database = WalletDbClient::new(&cli_args.database_url, cli_args.pool_size).await.expect("Database connection FAILED");
    if cli_args.initialize_db {
        info!("Initializing database");
        database.drop_schema().await.expect("Unable to drop schema");
    }
    database.create_schema().await.expect("Unable to create schema");

    let signal_handler = SignalHandler::new().spawn();
    let transactions: Arc<dyn TransactionStore> = Arc::new(PostgresStore::new(database.clone()));

    let tasks = vec![task::spawn(async move {
        if let Err(e) = sweeper(cli_args.clone(), signal_handler.clone(), transactions).await {
            error!("Abandoned action sweeper failed: {e}");
        }
    })];
    try_join_all(tasks).await.expect("Task panicked");
    database.close().await;
    info!("Shutdown complete");
}

fn configure_logging(cli_args: &CliArgs) {
    env_logger::Builder::new()
        .target(env_logger::Target::Stdout)
        .format_target(false)
        .format_timestamp_millis()
        .parse_filters(&cli_args.log_level)
        .write_style(if cli_args.log_no_color { env_logger::WriteStyle::Never } else { env_logger::WriteStyle::Always })
        .init();
}
