use crate::actions::abandon::abort_abandoned;
use crate::error::WalletError;
use crate::storage::TransactionStore;
use log::{debug, error, info, warn};
use std::error::Error;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio_cron_scheduler::{Job, JobScheduler};
use wallet_storage_cli::cli_args::CliArgs;
use wallet_storage_signal::signal_handler::SignalHandler;

/// Runs the abandoned action sweep on the configured cron schedule and on every SIGHUP until shutdown
pub async fn sweeper(
    cli_args: CliArgs,
    signal_handler: SignalHandler,
    transactions: Arc<dyn TransactionStore>,
) -> Result<(), Box<dyn Error>> {
    info!(
        "Abandoned action sweep scheduled at '{}', aborting actions unsigned for {}",
        cli_args.sweep_cron,
        humantime::format_duration(cli_args.abandon_after)
    );
    let (job_args, job_handler, job_store) = (cli_args.clone(), signal_handler.clone(), transactions.clone());
    let job = Job::new_async(format!("0 {}", cli_args.sweep_cron), move |_, _| {
        Box::pin(sweep(job_args.clone(), job_handler.clone(), job_store.clone()))
    })?;
    let mut scheduler = JobScheduler::new().await?;
    scheduler.add(job).await?;
    scheduler.start().await?;

    let ctx = signal_handler.context();
    let mut reload_rx = signal_handler.subscribe_reload();
    loop {
        tokio::select! {
            _ = ctx.cancelled() => break,
            received = reload_rx.recv() => match received {
                Ok(()) | Err(RecvError::Lagged(_)) => sweep(cli_args.clone(), signal_handler.clone(), transactions.clone()).await,
                Err(RecvError::Closed) => {
                    warn!("Reload channel closed, on demand sweeps disabled");
                    ctx.cancelled().await;
                    break;
                }
            },
        }
    }
    scheduler.shutdown().await?;
    Ok(())
}

pub async fn sweep(cli_args: CliArgs, signal_handler: SignalHandler, transactions: Arc<dyn TransactionStore>) {
    if signal_handler.is_shutdown() {
        return;
    }
    let start_time = Instant::now();
    let ctx = signal_handler.context();
    match abort_abandoned(&ctx, transactions.as_ref(), cli_args.abandon_after, cli_args.sweep_batch_size).await {
        Ok(0) => debug!("Sweep found no abandoned actions"),
        Ok(aborted) => {
            info!("\x1b[33mSweep aborted {} abandoned actions in {} ms\x1b[0m", aborted, start_time.elapsed().as_millis())
        }
        Err(WalletError::Cancelled) => info!("Sweep interrupted by shutdown"),
        Err(e) => error!("Sweep failed: {}", e),
    }
}
