/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Length-limited CRLF line reader over an async byte stream, plus the
//! rolling-rate slow-transfer detector used while reading a DATA body.

use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use trc::Error;

#[derive(Debug, Clone, Copy)]
pub struct LineIoLimits {
    pub max_line_length: usize,
    pub command_timeout: Duration,
    pub data_timeout: Duration,
}

impl Default for LineIoLimits {
    fn default() -> Self {
        LineIoLimits {
            max_line_length: 4096,
            command_timeout: Duration::from_secs(300),
            data_timeout: Duration::from_secs(600),
        }
    }
}

/// Reads a single CRLF-terminated line (CRLF stripped) from `stream`,
/// bounded by `max_len` and `timeout`. Returns `Ok(None)` on clean EOF.
pub async fn read_line<R: AsyncRead + Unpin>(
    stream: &mut R,
    buf: &mut Vec<u8>,
    max_len: usize,
    timeout: Duration,
) -> Result<Option<Vec<u8>>, Error> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(pos) = find_crlf(buf) {
            let line = buf[..pos].to_vec();
            buf.drain(..pos + 2);
            return Ok(Some(line));
        }
        if buf.len() > max_len {
            return Err(Error::protocol(500, "5.5.2", "line too long"));
        }
        let mut chunk = [0u8; 2048];
        let read = tokio::time::timeout_at(deadline, stream.read(&mut chunk))
            .await
            .map_err(|_| Error::local_transient("read timed out"))??;
        if read == 0 {
            return if buf.is_empty() {
                Ok(None)
            } else {
                Err(Error::local_transient("connection closed mid-line"))
            };
        }
        buf.extend_from_slice(&chunk[..read]);
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Tracks the rolling byte rate of a DATA transfer and flags when it
/// drops below `min_bytes_per_window` for a continuous `window`.
pub struct SlowTransferGuard {
    window: Duration,
    min_bytes: u64,
    window_start: Instant,
    window_bytes: u64,
    violating_since: Option<Instant>,
}

impl SlowTransferGuard {
    pub fn new(window: Duration, min_bytes_per_window: u64) -> Self {
        SlowTransferGuard {
            window,
            min_bytes: min_bytes_per_window,
            window_start: Instant::now(),
            window_bytes: 0,
            violating_since: None,
        }
    }

    /// Returns `true` once the slow-transfer window has elapsed while
    /// the rate stayed below threshold continuously.
    pub fn record(&mut self, bytes: usize) -> bool {
        self.window_bytes += bytes as u64;
        let now = Instant::now();
        if now.duration_since(self.window_start) < self.window {
            return false;
        }
        let slow = self.window_bytes < self.min_bytes;
        self.window_start = now;
        self.window_bytes = 0;
        if slow {
            let since = *self.violating_since.get_or_insert(now);
            now.duration_since(since) >= self.window
        } else {
            self.violating_since = None;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_one_line_at_a_time() {
        let mut stream = std::io::Cursor::new(b"EHLO foo\r\nMAIL FROM:<a@b>\r\n".to_vec());
        let mut buf = Vec::new();
        let line = read_line(&mut stream, &mut buf, 512, Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line, b"EHLO foo");
        let line = read_line(&mut stream, &mut buf, 512, Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line, b"MAIL FROM:<a@b>");
    }

    #[tokio::test]
    async fn rejects_oversized_line() {
        let mut stream = std::io::Cursor::new(vec![b'a'; 100]);
        let mut buf = Vec::new();
        let err = read_line(&mut stream, &mut buf, 10, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err.kind, trc::ErrorKind::ProtocolViolation { .. }));
    }

    #[test]
    fn slow_transfer_needs_two_consecutive_windows() {
        let mut guard = SlowTransferGuard::new(Duration::from_millis(1), 1_000_000);
        std::thread::sleep(Duration::from_millis(2));
        assert!(!guard.record(10));
        std::thread::sleep(Duration::from_millis(2));
        assert!(guard.record(10));
    }
}
