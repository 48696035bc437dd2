use futures::StreamExt;
use log::{error, warn};
use reqwest::{Client, Response};
use tokio::sync::mpsc;

use airbear_logic::{RawVehicleRow, prelude::*};

const CHANNEL_CAPACITY: usize = 60;

/// Reassembles newline-delimited JSON out of arbitrary chunk boundaries.
/// The server flushes one row per line but the network is free to split or
/// coalesce however it likes.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    /// Consume a chunk, returning every line it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for byte in chunk {
            if *byte == b'\n' {
                let raw = std::mem::take(&mut self.partial);
                match String::from_utf8(raw) {
                    Ok(line) if !line.trim().is_empty() => lines.push(line),
                    Ok(_) => {}
                    Err(why) => warn!("Skipping non-utf8 feed line: {why}"),
                }
            } else {
                self.partial.push(*byte);
            }
        }

        lines
    }
}

/// Open the server's NDJSON change stream as a row channel. The spawned
/// reader exits when the stream drops or the receiver is released, closing
/// the channel either way so the feed can fall back to polling.
pub(crate) async fn open_vehicle_channel(
    client: Client,
    url: String,
) -> Result<mpsc::Receiver<RawVehicleRow>> {
    let resp = client
        .get(url)
        .send()
        .await
        .context("Could not open vehicle stream")?
        .error_for_status()
        .context("Server refused vehicle stream")?;

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        read_loop(resp, tx).await;
    });

    Ok(rx)
}

async fn read_loop(resp: Response, tx: mpsc::Sender<RawVehicleRow>) {
    let mut chunks = resp.bytes_stream();
    let mut buffer = LineBuffer::default();

    while let Some(chunk) = chunks.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(why) => {
                error!("Vehicle stream lost: {why}");
                break;
            }
        };

        for line in buffer.push(&chunk) {
            let row = match serde_json::from_str::<RawVehicleRow>(&line) {
                Ok(row) => row,
                Err(why) => {
                    warn!("Skipping undecodable feed line: {why}");
                    continue;
                }
            };

            if tx.send(row).await.is_err() {
                // Receiver dropped, the subscription is gone
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_split_across_chunks_reassemble() {
        let mut buffer = LineBuffer::default();

        assert!(buffer.push(b"{\"id\":\"air").is_empty());
        let lines = buffer.push(b"bear-1\"}\n{\"id\":");
        assert_eq!(lines, vec!["{\"id\":\"airbear-1\"}".to_string()]);

        let lines = buffer.push(b"\"airbear-2\"}\n");
        assert_eq!(lines, vec!["{\"id\":\"airbear-2\"}".to_string()]);
    }

    #[test]
    fn multiple_lines_in_one_chunk() {
        let mut buffer = LineBuffer::default();
        let lines = buffer.push(b"one\ntwo\nthree\n");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn blank_keepalive_lines_are_skipped() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"\n\n  \n").is_empty());
    }
}
