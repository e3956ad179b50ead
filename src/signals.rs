use tokio::signal;

/// Resolves on the first interrupt, terminate or quit signal.
#[cfg(unix)]
pub async fn signal_for_shutdown() -> crate::Result<()> {
    use signal::unix::{signal, SignalKind};

    let mut terminate_signal = signal(SignalKind::terminate())?;
    let mut quit_signal = signal(SignalKind::quit())?;

    tokio::select! {
        result = signal::ctrl_c() => result?,
        _ = terminate_signal.recv() => (),
        _ = quit_signal.recv() => (),
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn signal_for_shutdown() -> crate::Result<()> {
    signal::ctrl_c().await?;
    Ok(())
}
