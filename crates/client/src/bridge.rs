//! Pumps bytes between the network transport and the RPC engine's port.
//!
//! Two independent activities. A read that times out is only a scheduling
//! slice; EOF, any other I/O error, or a write stuck for a whole slice means
//! the connection is gone and the attempt is moved to `BreakingTransient`.
//!
//! The pumps do not stop when the attempt leaves `Running`: teardown still
//! needs them to carry the final releases. They stop on their own `halt`
//! token, which teardown cancels last.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::state::AttemptSignal;

const CHUNK_BYTES: usize = 16 * 1024;

/// Outcome of one bounded read.
enum Slice {
    Data(usize),
    Idle,
    Eof,
    Halted,
}

async fn read_slice<R>(
    src: &mut R,
    buf: &mut [u8],
    slice: Duration,
    halt: &CancellationToken,
) -> std::io::Result<Slice>
where
    R: AsyncRead + Unpin,
{
    tokio::select! {
        r = tokio::time::timeout(slice, src.read(buf)) => match r {
            Err(_) => Ok(Slice::Idle),
            Ok(Ok(0)) => Ok(Slice::Eof),
            Ok(Ok(n)) => Ok(Slice::Data(n)),
            Ok(Err(e)) => Err(e),
        },
        _ = halt.cancelled() => Ok(Slice::Halted),
    }
}

/// Copy `src` into `dst` until halted or either side fails.
///
/// `direction` names the activity in logs. Failures are reported on
/// `signal`. `dst` is shut down on exit, so the peer of `dst` observes EOF.
pub(crate) async fn pump<R, W>(
    direction: &'static str,
    mut src: R,
    mut dst: W,
    slice: Duration,
    signal: AttemptSignal,
    halt: CancellationToken,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_BYTES];
    loop {
        let n = match read_slice(&mut src, &mut buf, slice, &halt).await {
            Ok(Slice::Data(n)) => n,
            Ok(Slice::Idle) => continue,
            Ok(Slice::Halted) => break,
            Ok(Slice::Eof) => {
                tracing::debug!(direction, "bridge source closed");
                signal.break_transient();
                break;
            }
            Err(e) => {
                tracing::debug!(direction, error = %e, "bridge read failed");
                signal.break_transient();
                break;
            }
        };

        tokio::select! {
            r = tokio::time::timeout(slice, dst.write_all(&buf[..n])) => match r {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::debug!(direction, error = %e, "bridge write failed");
                    signal.break_transient();
                    break;
                }
                Err(_) => {
                    tracing::warn!(direction, "bridge write stalled, dropping the connection");
                    signal.break_transient();
                    break;
                }
            },
            _ = halt.cancelled() => break,
        }
    }
    let _ = tokio::time::timeout(slice, dst.shutdown()).await;
    tracing::trace!(direction, "bridge activity exited");
}
