use std::future::Future;

use anyhow::Result;
use futures_util::future::select_all;
use tokio::signal::unix::{self, SignalKind};

pub const TERMINATION_SIGNALS: [libc::c_int; 3] = [libc::SIGINT, libc::SIGTERM, libc::SIGQUIT];

/// Runs `f` until it finishes or a termination signal arrives.
pub async fn run_or_terminate<F>(f: F) -> Result<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let task = tokio::spawn(f);
    let signal = any_signal(TERMINATION_SIGNALS.map(SignalKind::from_raw))?;

    tokio::select! {
        res = task => res?,
        signal = signal => {
            tracing::info!(?signal, "received termination signal");
            Ok(())
        }
    }
}

/// Resolves with the first of `signals` to arrive.
fn any_signal<I>(signals: I) -> Result<impl Future<Output = SignalKind>>
where
    I: IntoIterator<Item = SignalKind>,
{
    let listeners = signals
        .into_iter()
        .map(|kind| -> Result<_> {
            let mut stream = unix::signal(kind)?;
            Ok(Box::pin(async move {
                stream.recv().await;
                kind
            }))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(async move { select_all(listeners).await.0 })
}
