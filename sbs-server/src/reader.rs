//! Line reader: pulls newline-delimited BaseStation records off a feed and
//! publishes them, unparsed, to every subscriber.
//!
//! The source is a [`LineSource`] so tests can script the feed without a
//! socket. Publishing goes through a `tokio::sync::broadcast` channel; a
//! subscriber that falls behind sees `Lagged` rather than slowing the reader.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::ReaderError;

/// Lines buffered per subscriber before it starts lagging.
pub const LINE_CHANNEL_CAPACITY: usize = 4096;

#[async_trait]
pub trait LineSource: Send {
    /// Next line without its terminator. `Ok(None)` at end of stream.
    async fn read_line(&mut self) -> Result<Option<String>, ReaderError>;
}

// ---------------------------------------------------------------------------
// TCP source
// ---------------------------------------------------------------------------

pub struct TcpLineSource {
    reader: BufReader<TcpStream>,
    read_timeout: Duration,
    buf: String,
}

impl TcpLineSource {
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, ReaderError> {
        let addr = format!("{host}:{port}");
        let stream = match timeout(connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(ReaderError::Connect { addr, source }),
            Err(_) => {
                return Err(ReaderError::ConnectTimeout {
                    addr,
                    timeout: connect_timeout,
                })
            }
        };
        info!(%addr, "connected to feed");
        Ok(TcpLineSource {
            reader: BufReader::with_capacity(8192, stream),
            read_timeout,
            buf: String::new(),
        })
    }
}

#[async_trait]
impl LineSource for TcpLineSource {
    async fn read_line(&mut self) -> Result<Option<String>, ReaderError> {
        self.buf.clear();
        let n = timeout(self.read_timeout, self.reader.read_line(&mut self.buf))
            .await
            .map_err(|_| ReaderError::ReadTimeout(self.read_timeout))??;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.buf.trim_end_matches(['\r', '\n']).to_string()))
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

pub struct MessageReader {
    lines: broadcast::Sender<String>,
}

impl Default for MessageReader {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageReader {
    pub fn new() -> Self {
        let (lines, _) = broadcast::channel(LINE_CHANNEL_CAPACITY);
        MessageReader { lines }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.lines.subscribe()
    }

    /// Read until cancelled or the source fails. Returns the number of
    /// lines published when cancelled; end of stream is [`ReaderError::Closed`].
    pub async fn run<S: LineSource + ?Sized>(
        &self,
        source: &mut S,
        token: &CancellationToken,
    ) -> Result<u64, ReaderError> {
        let mut published = 0u64;
        loop {
            let line = tokio::select! {
                _ = token.cancelled() => {
                    debug!(published, "reader cancelled");
                    return Ok(published);
                }
                line = source.read_line() => line?,
            };
            let Some(line) = line else {
                return Err(ReaderError::Closed);
            };
            if line.trim().is_empty() {
                continue;
            }
            // No receivers is fine; lines are simply not observed
            let _ = self.lines.send(line);
            published += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    /// Replays fixed lines, then either ends or hangs.
    struct ScriptedSource {
        lines: VecDeque<String>,
        hang_at_end: bool,
    }

    impl ScriptedSource {
        fn new(lines: &[&str], hang_at_end: bool) -> Self {
            ScriptedSource {
                lines: lines.iter().map(|l| l.to_string()).collect(),
                hang_at_end,
            }
        }
    }

    #[async_trait]
    impl LineSource for ScriptedSource {
        async fn read_line(&mut self) -> Result<Option<String>, ReaderError> {
            match self.lines.pop_front() {
                Some(line) => Ok(Some(line)),
                None if self.hang_at_end => std::future::pending().await,
                None => Ok(None),
            }
        }
    }

    const LINES: [&str; 3] = [
        "MSG,5,1,1,3965A3,1,2023/08/23,12:07:27.929,2023/08/23,12:07:27.932,,18025,,,,,,,0,,0,",
        "",
        "MSG,3,1,1,407DCD,1,2023/08/23,12:07:28.001,2023/08/23,12:07:28.010,,32000,,,53.1,-2.4,,,0,0,0,0",
    ];

    #[tokio::test]
    async fn test_publishes_non_empty_lines_then_closes() {
        let reader = MessageReader::new();
        let mut rx = reader.subscribe();
        let mut source = ScriptedSource::new(&LINES, false);

        let result = reader.run(&mut source, &CancellationToken::new()).await;
        assert!(matches!(result, Err(ReaderError::Closed)));

        assert_eq!(rx.recv().await.unwrap(), LINES[0]);
        assert_eq!(rx.recv().await.unwrap(), LINES[2]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_line() {
        let reader = MessageReader::new();
        let mut a = reader.subscribe();
        let mut b = reader.subscribe();
        let mut source = ScriptedSource::new(&LINES, false);
        let _ = reader.run(&mut source, &CancellationToken::new()).await;

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await.unwrap(), LINES[0]);
            assert_eq!(rx.recv().await.unwrap(), LINES[2]);
        }
    }

    #[tokio::test]
    async fn test_cancel_stops_reader() {
        let reader = MessageReader::new();
        let token = CancellationToken::new();
        let mut source = ScriptedSource::new(&LINES, true);

        token.cancel();
        let published = reader.run(&mut source, &token).await.unwrap();
        assert!(published <= 2);

        let token = CancellationToken::new();
        let mut source = ScriptedSource::new(&LINES, true);
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        assert_eq!(reader.run(&mut source, &token).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_tcp_source_reads_crlf_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let payload = format!("{}\r\n{}\r\n", LINES[0], LINES[2]);
            socket.write_all(payload.as_bytes()).await.unwrap();
        });

        let mut source = TcpLineSource::connect(
            "127.0.0.1",
            port,
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(source.read_line().await.unwrap().as_deref(), Some(LINES[0]));
        assert_eq!(source.read_line().await.unwrap().as_deref(), Some(LINES[2]));
        assert_eq!(source.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_tcp_read_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(socket);
        });

        let mut source = TcpLineSource::connect(
            "127.0.0.1",
            port,
            Duration::from_secs(1),
            Duration::from_millis(50),
        )
        .await
        .unwrap();
        let err = source.read_line().await.unwrap_err();
        assert!(matches!(err, ReaderError::ReadTimeout(_)));
        server.abort();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port with nothing listening
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = TcpLineSource::connect(
            "127.0.0.1",
            port,
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ReaderError::Connect { .. }));
    }
}
