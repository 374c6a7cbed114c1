//! Line-delimited message intake with a bound on in-flight handlers.

use std::future::Future;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::worker::dispatch::Disposition;

/// Reads messages one per line and runs `handler` on each, keeping at most
/// `max_in_flight` handlers running. Reading pauses while at capacity.
///
/// `on_done` receives the 1-based line number and disposition as each
/// handler finishes. Blank lines are skipped but still numbered. Stops at
/// EOF or cancellation, then drains in-flight handlers. Returns the number
/// of lines read.
pub async fn run_intake<R, H, Fut, D>(
    reader: R,
    max_in_flight: usize,
    cancel: CancellationToken,
    handler: H,
    mut on_done: D,
) -> Result<u64, AppError>
where
    R: AsyncBufRead + Unpin,
    H: Fn(String) -> Fut,
    Fut: Future<Output = Disposition> + Send + 'static,
    D: FnMut(u64, Disposition),
{
    let max_in_flight = max_in_flight.max(1);
    let mut lines = reader.lines();
    let mut handlers: JoinSet<(u64, Disposition)> = JoinSet::new();
    let mut line_no: u64 = 0;

    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line
                .map_err(|e| AppError::Internal(format!("Failed to read message line: {e}")))?,
        };
        let Some(body) = line else { break };
        line_no += 1;
        if body.trim().is_empty() {
            continue;
        }

        if handlers.len() >= max_in_flight {
            if let Some(done) = handlers.join_next().await {
                let (n, disposition) = done.map_err(join_error)?;
                on_done(n, disposition);
            }
        }

        let task = handler(body);
        let n = line_no;
        handlers.spawn(async move { (n, task.await) });

        while let Some(done) = handlers.try_join_next() {
            let (n, disposition) = done.map_err(join_error)?;
            on_done(n, disposition);
        }
    }

    while let Some(done) = handlers.join_next().await {
        let (n, disposition) = done.map_err(join_error)?;
        on_done(n, disposition);
    }

    Ok(line_no)
}

fn join_error(e: tokio::task::JoinError) -> AppError {
    AppError::Internal(format!("Handler task failed: {e}"))
}
