use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use lib_scene::{spawn_control_loop, MonotonicClock, ProcessMemoryProbe, SceneContext};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

mod host_logic;
use host_logic::{bridge, config, logger, renderer::HeadlessRenderer};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config();
    logger::setup_logging(&config.log_dir(), config.log_level())?;

    let engine = config.engine_config().context("building engine configuration")?;
    log::info!("Starting scene host with {}", engine);

    let shutdown = CancellationToken::new();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let writer_handle = tokio::spawn(bridge::write_responses(out_rx));

    let probe = ProcessMemoryProbe::new(engine.heap_budget_mb, engine.low_memory_threshold_mb);
    let mut context = SceneContext::new(
        Arc::new(HeadlessRenderer::new()),
        Box::new(probe),
        Arc::new(MonotonicClock::new()),
        &engine,
    );
    context.set_listener(Box::new(bridge::EventForwarder::new(out_tx.clone())));

    let (handle, control_handle) = spawn_control_loop(
        context,
        Box::new(bridge::ResultForwarder::new(out_tx.clone())),
        Duration::from_millis(engine.monitor_tick_interval_ms),
        shutdown.clone(),
    );

    let bridge_handle = tokio::spawn(bridge::run(
        handle,
        bridge::spawn_stdin_reader(),
        out_tx,
        shutdown.clone(),
    ));

    // Wait for a signal, a shutdown request, or end of input
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Could not install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
        _ = shutdown.cancelled() => {
            log::info!("Shutdown requested by host.");
        }
    }

    shutdown.cancel();

    match control_handle.await {
        Ok(summary) => log::info!(
            "Control loop stopped: {} scenes and {} components torn down, {} async tokens cancelled",
            summary.scenes,
            summary.components,
            summary.cancelled_tokens
        ),
        Err(e) => log::error!("Control loop task failed: {}", e),
    }
    let _ = bridge_handle.await;
    match writer_handle.await {
        Ok(Err(e)) => log::error!("Response writer failed: {}", e),
        Err(e) => log::error!("Response writer task failed: {}", e),
        Ok(Ok(())) => {}
    }

    log::info!("Shutdown complete.");
    Ok(())
}
