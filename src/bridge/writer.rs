//! Bridge writer task.
//!
//! Serialises outbound JSON requests to single lines and writes them to the
//! bridge socket.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Write every message received on `msg_rx` as one NDJSON line.
///
/// Exits cleanly on cancellation or when all senders are dropped.
///
/// # Errors
///
/// Returns [`AppError::Bridge`] if serialisation or the socket write fails.
pub async fn run_writer<W>(
    connection_id: String,
    mut sink: W,
    mut msg_rx: mpsc::Receiver<serde_json::Value>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(connection_id, "bridge writer cancelled");
                break;
            }

            msg = msg_rx.recv() => {
                let Some(value) = msg else {
                    debug!(connection_id, "bridge writer channel closed");
                    break;
                };
                let mut bytes = serde_json::to_vec(&value).map_err(|e| {
                    AppError::Bridge(format!("failed to serialise outbound message: {e}"))
                })?;
                bytes.push(b'\n');

                sink.write_all(&bytes).await.map_err(|e| {
                    warn!(connection_id, error = %e, "bridge write failed");
                    AppError::Bridge(format!("write failed: {e}"))
                })?;
            }
        }
    }

    let _ = sink.shutdown().await;
    Ok(())
}
