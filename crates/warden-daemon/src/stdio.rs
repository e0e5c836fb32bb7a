//! JSON-lines port over stdin/stdout
//!
//! One [`RequestMessage`] per input line, one [`PortMessage`] per output line.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use warden_core::{PortMessage, RequestMessage};

/// Parse one input line; blank lines yield `None`
pub fn parse_line(line: &str) -> Option<serde_json::Result<RequestMessage>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_str(line))
}

/// Feed parsed lines from `reader` into `inbound` until EOF
pub async fn read_requests<R>(reader: R, inbound: mpsc::Sender<RequestMessage>) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        match parse_line(&line) {
            None => continue,
            Some(Ok(message)) => {
                if inbound.send(message).await.is_err() {
                    debug!("Port server stopped, no longer reading input");
                    break;
                }
            }
            Some(Err(e)) => warn!(line = line_no, "Skipping malformed request: {}", e),
        }
    }
    Ok(())
}

/// Write every outbound message from `outbound` to `writer` as a JSON line
pub async fn write_messages<W>(mut writer: W, mut outbound: mpsc::Receiver<PortMessage>) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
    }
    Ok(())
}
