//! Pipe I/O between the host and a route process

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;

const CHUNK_SIZE: usize = 8 * 1024;

/// Bytes collected from one output stream
#[derive(Debug, Default, Clone)]
pub struct CapturedOutput {
    /// Captured bytes, at most the configured limit
    pub bytes: Vec<u8>,

    /// Total bytes the process wrote, including discarded ones
    pub total: usize,

    /// Whether the limit was exceeded
    pub overflowed: bool,
}

impl CapturedOutput {
    /// Lossy text rendering for logs
    pub fn lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Write the whole payload to the process input and close it.
///
/// A process may legitimately exit without reading its input, so a broken
/// pipe is reported as `Ok(false)` rather than an error.
pub async fn write_input<W>(mut stdin: W, payload: &[u8]) -> io::Result<bool>
where
    W: AsyncWrite + Unpin,
{
    let result = async {
        stdin.write_all(payload).await?;
        stdin.flush().await?;
        stdin.shutdown().await
    }
    .await;

    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(false),
        Err(e) => Err(e),
    }
}

/// Read a stream to the end, keeping at most `limit` bytes.
///
/// The rest is drained and discarded so the writer never blocks on a full
/// pipe.
pub async fn drain_capped<R>(mut reader: R, limit: usize) -> io::Result<CapturedOutput>
where
    R: AsyncRead + Unpin,
{
    let mut captured = CapturedOutput::default();
    let mut chunk = vec![0u8; CHUNK_SIZE];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }

        captured.total += n;
        let room = limit.saturating_sub(captured.bytes.len());
        if n > room {
            captured.overflowed = true;
        }
        captured.bytes.extend_from_slice(&chunk[..n.min(room)]);
    }

    Ok(captured)
}

/// Read a stream to the end, giving up once more than `limit` bytes arrive.
///
/// On overflow the signal is fired and reading stops; the caller is expected
/// to terminate the writer.
pub async fn read_capped<R>(
    mut reader: R,
    limit: usize,
    overflow: oneshot::Sender<()>,
) -> io::Result<CapturedOutput>
where
    R: AsyncRead + Unpin,
{
    let mut captured = CapturedOutput::default();
    let mut chunk = vec![0u8; CHUNK_SIZE];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }

        captured.total += n;
        if captured.total > limit {
            captured.overflowed = true;
            let room = limit.saturating_sub(captured.bytes.len());
            captured.bytes.extend_from_slice(&chunk[..n.min(room)]);
            let _ = overflow.send(());
            break;
        }
        captured.bytes.extend_from_slice(&chunk[..n]);
    }

    Ok(captured)
}
