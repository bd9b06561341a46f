use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use folio_build::{BuildError, BuildLoop, BuildOutcome, BuilderRegistry, InFlight};
use folio_core::Settings;

use crate::error::{io_err, DaemonError};

/// How often the audit log size is checked.
pub const ROTATION_INTERVAL: Duration = Duration::from_secs(60);

/// How long blocking work may keep the process alive after shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(settings: Settings, registry: &BuilderRegistry) -> Result<(), DaemonError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    let result = runtime.block_on(run(settings, registry));
    // An interrupted build is still running on a blocking thread; its task
    // was already marked failed, so there is nothing left to wait for.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

/// Run until ctrl-c.
pub async fn run(settings: Settings, registry: &BuilderRegistry) -> Result<(), DaemonError> {
    run_until(settings, registry, async {
        tokio::signal::ctrl_c()
            .await
            .map_err(|err| DaemonError::Signal(format!("ctrl-c handler failed: {err}")))
    })
    .await
}

/// Run until `stop` resolves or the build loop hits a fatal error.
///
/// The build loop runs once immediately and then every
/// `build.interval_secs`. On shutdown the task of an in-flight build is
/// marked failed and the locks it holds are released before the daemon
/// stops.
pub async fn run_until<F>(
    settings: Settings,
    registry: &BuilderRegistry,
    stop: F,
) -> Result<(), DaemonError>
where
    F: Future<Output = Result<(), DaemonError>> + Send + 'static,
{
    let in_flight = InFlight::new();
    let build_loop = BuildLoop::new(settings.clone(), registry)?.with_in_flight(in_flight.clone());
    let interval = settings.build.interval();
    let work_dir = settings.work_dir();

    tracing::info!(
        base = %settings.base_dir.display(),
        builder = %settings.build.builder,
        interval_secs = settings.build.interval_secs,
        "folio daemon started",
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let build_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = build_task(build_loop, interval, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = log_rotation_task(work_dir, ROTATION_INTERVAL, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = stop => {
                    tracing::info!("shutdown requested, stopping daemon");
                    mark_interrupted(&in_flight);
                    let _ = shutdown.send(());
                    signal
                }
            }
        })
    };

    let (build_result, rotation_result, signal_result) =
        tokio::join!(build_handle, rotation_handle, signal_handle);

    handle_join("build", build_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("folio daemon stopped");
    Ok(())
}

async fn build_task(
    build_loop: BuildLoop,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let build_loop = Arc::new(Mutex::new(build_loop));
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {}
        }

        let shared = Arc::clone(&build_loop);
        let job = tokio::task::spawn_blocking(move || lock(&shared).run());
        let result = tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::warn!("shutdown during build; not waiting for it to finish");
                break;
            }
            joined = job => joined.map_err(|err| DaemonError::Join {
                task: "build",
                message: err.to_string(),
            })?,
        };

        match result {
            Ok(outcome) => log_outcome(&outcome),
            Err(err @ BuildError::NoServableRelease { .. }) => return Err(err.into()),
            Err(err) => {
                tracing::error!(error = %err, kind = ?err.kind(), "build run failed");
            }
        }
    }
    Ok(())
}

async fn log_rotation_task(
    work_dir: PathBuf,
    every: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let work_dir = work_dir.clone();
                tokio::task::spawn_blocking(move || {
                    crate::log_rotation::rotate_logs(&work_dir);
                })
                .await
                .ok(); // rotation failures are logged inside rotate_logs
            }
        }
    }
    Ok(())
}

/// The interrupted build thread is never joined, so its locks would not be
/// dropped before the process exits. Revoke them here.
fn mark_interrupted(in_flight: &InFlight) {
    if in_flight.abandon() {
        tracing::warn!("interrupted build marked failed");
    }
}

fn log_outcome(outcome: &BuildOutcome) {
    match outcome {
        BuildOutcome::Busy => tracing::debug!("build lock held by another process"),
        BuildOutcome::Aborted { reason } => {
            tracing::info!(%reason, "build run declined by preflight hook");
        }
        BuildOutcome::Completed {
            published,
            decision,
        } => match published.last() {
            Some(latest) => tracing::info!(
                count = published.len(),
                latest = %latest,
                "published releases",
            ),
            None => tracing::debug!(decision = ?decision, "nothing to publish"),
        },
    }
}

fn lock(build_loop: &Mutex<BuildLoop>) -> MutexGuard<'_, BuildLoop> {
    build_loop.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Join {
            task,
            message: err.to_string(),
        }),
    }
}

/// Install the process-wide subscriber on stderr. `RUST_LOG` wins over the
/// `info` default; `json` selects the JSON formatter.
pub fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
