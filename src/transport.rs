//! Line transport primitives
//!
//! The wire is `\r`-delimited ASCII with no length field. [`LineFramer`]
//! turns the unbounded inbound byte stream into discrete lines with a
//! bounded remainder; [`write_line`] appends the delimiter and paces
//! writes so slow receiver firmware is not overrun.

use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Line delimiter on the wire
pub const DELIMITER: u8 = b'\r';
/// Cap on the undelimited remainder kept between reads
pub const BUFFER_LENGTH: usize = 1024;
/// Socket connect timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Pacing delay after each write
pub const SEND_PACING: Duration = Duration::from_millis(10);
/// Keep-alive interval while connected
pub const PULSE_INTERVAL: Duration = Duration::from_secs(5);
/// Unanswered pulses tolerated before forcing a reconnect
pub const MAX_PENDING_PULSES: u32 = 2;

/// Delay before the next connection attempt, by consecutive-failure count
pub fn reconnect_delay(failures: u32) -> Duration {
    let secs = match failures {
        0 | 1 => 0,
        2 => 5,
        3 => 10,
        4 => 30,
        _ => 60,
    };
    Duration::from_secs(secs)
}

/// Splits an inbound byte stream into delimiter-terminated lines
#[derive(Default)]
pub struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes and return the complete lines they finish.
    ///
    /// Undecodable segments are logged and skipped; the trailing remainder
    /// is capped so a malformed peer cannot grow the buffer without bound.
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(data);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == DELIMITER) {
            let segment: Vec<u8> = self.buf.drain(..=pos).take(pos).collect();
            match std::str::from_utf8(&segment) {
                // Tolerate CRLF peers: a leftover `\n` leads the next line
                Ok(s) => lines.push(s.trim_matches('\n').to_string()),
                Err(e) => tracing::warn!("dropping undecodable segment: {}", e),
            }
        }
        if self.buf.len() > BUFFER_LENGTH {
            let start = self.buf.len() - BUFFER_LENGTH;
            self.buf.drain(..start);
        }
        lines
    }
}

/// Append the delimiter, write, and pace the connection
pub async fn write_line<W: AsyncWriteExt + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    tracing::debug!("send: {:?}", line);
    let mut framed = Vec::with_capacity(line.len() + 1);
    framed.extend_from_slice(line.as_bytes());
    framed.push(DELIMITER);
    writer.write_all(&framed).await?;
    writer.flush().await?;
    tokio::time::sleep(SEND_PACING).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_table() {
        let delays: Vec<u64> = (0..7).map(|n| reconnect_delay(n).as_secs()).collect();
        assert_eq!(delays, vec![0, 0, 5, 10, 30, 60, 60]);
    }

    #[test]
    fn framer_splits_on_delimiter() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"PWON\rMV5"), vec!["PWON"]);
        assert_eq!(framer.push(b"0\r"), vec!["MV50"]);

        // CRLF peers leave a leading newline on the next segment
        assert_eq!(framer.push(b"A\r\nB\r"), vec!["A", "B"]);
    }

    #[test]
    fn framer_caps_remainder() {
        let mut framer = LineFramer::new();
        let garbage = vec![b'x'; 3 * BUFFER_LENGTH];
        assert!(framer.push(&garbage).is_empty());
        assert!(framer.buf.len() <= BUFFER_LENGTH);
        // A later delimiter still yields the capped tail
        let lines = framer.push(b"\r");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), BUFFER_LENGTH);
    }
}
