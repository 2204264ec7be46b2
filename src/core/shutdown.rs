//! # OS termination signals for [`Station::run_until_shutdown`](crate::Station::run_until_shutdown).
//!
//! Unix: `SIGINT`, `SIGTERM` (service manager stop) and `SIGQUIT`.
//! Elsewhere: Ctrl-C.

/// Completes on the first termination signal; `Err` if a listener cannot be installed.
#[cfg(unix)]
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
