//! Line Connector: a TCP client for SHDR sources with PING/PONG
//! heartbeats, reconnection, and a legacy inactivity timeout (§4.10).

pub mod error;
pub mod protocol;

pub use error::ConnectorError;
pub use protocol::ProtocolCommand;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;

/// Receives data lines and protocol command notifications from a running
/// connector session. Implemented by whatever owns the pipeline for this
/// source.
pub trait LineSink: Send + Sync {
    fn on_data_line(&self, line: &str);
    fn on_command(&self, command: ProtocolCommand);
    fn on_connect_status(&self, connected: bool);
}

/// `None` until a `PONG` is seen; `Some(frequency)` once the session has
/// switched to heartbeat mode.
type HeartbeatFrequency = Option<Duration>;

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub host: String,
    pub port: u16,
    pub reconnect_interval: Duration,
    pub legacy_timeout: Duration,
}

impl ConnectorConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            reconnect_interval: Duration::from_secs(10),
            legacy_timeout: Duration::from_secs(600),
        }
    }
}

pub struct LineConnector {
    config: ConnectorConfig,
}

impl LineConnector {
    pub fn new(config: ConnectorConfig) -> Self {
        Self { config }
    }

    /// Runs the connect/serve/reconnect loop until `cancel` fires. Never
    /// returns an error: transport failures are logged and retried after
    /// `reconnectInterval`, matching §7's retry policy for this category.
    pub async fn run(&self, sink: Arc<dyn LineSink>, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }

            match self.connect_and_serve(&sink, &cancel).await {
                Ok(()) => debug!("connector session to {}:{} ended", self.config.host, self.config.port),
                Err(err) => warn!("connector session to {}:{} failed: {err}", self.config.host, self.config.port),
            }

            sink.on_connect_status(false);

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_interval) => {}
                _ = cancel.cancelled() => return,
            }
        }
    }

    async fn connect_and_serve(&self, sink: &Arc<dyn LineSink>, cancel: &CancellationToken) -> Result<(), ConnectorError> {
        let stream = TcpStream::connect((self.config.host.as_str(), self.config.port))
            .await
            .map_err(ConnectorError::Connect)?;
        info!("connected to {}:{}", self.config.host, self.config.port);

        let (read_half, mut write_half) = stream.into_split();
        let mut lines = FramedRead::new(read_half, LinesCodec::new());

        write_half.write_all(b"* PING\n").await.map_err(ConnectorError::Write)?;
        sink.on_connect_status(true);

        let mut heartbeat: HeartbeatFrequency = None;
        let mut deadline = tokio::time::Instant::now() + self.config.legacy_timeout;
        let mut ping_ticker: Option<tokio::time::Interval> = None;

        loop {
            let tick = async {
                match &mut ping_ticker {
                    Some(ticker) => {
                        ticker.tick().await;
                    }
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(ConnectorError::InactivityTimeout);
                }
                _ = tick => {
                    let _ = write_half.write_all(b"* PING\n").await;
                }
                line = lines.next() => {
                    let Some(line) = line else { return Err(ConnectorError::StreamClosed) };
                    let line = line.map_err(|_| ConnectorError::StreamClosed)?;

                    deadline = match heartbeat {
                        Some(frequency) => tokio::time::Instant::now() + frequency * 2,
                        None => tokio::time::Instant::now() + self.config.legacy_timeout,
                    };

                    if line.starts_with('*') {
                        let command = protocol::parse_command(&line);
                        if let ProtocolCommand::Pong { frequency_ms } = command {
                            let frequency = Duration::from_millis(frequency_ms);
                            heartbeat = Some(frequency);
                            deadline = tokio::time::Instant::now() + frequency * 2;
                            let mut interval = tokio::time::interval(frequency);
                            interval.tick().await; // first tick fires immediately
                            ping_ticker = Some(interval);
                            info!("entering heartbeat mode, frequency {frequency:?}");
                        } else if !matches!(command, ProtocolCommand::Ping) {
                            sink.on_command(command);
                        }
                    } else {
                        sink.on_data_line(&line);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        lines: Mutex<Vec<String>>,
        commands: Mutex<Vec<ProtocolCommand>>,
    }

    impl LineSink for RecordingSink {
        fn on_data_line(&self, line: &str) {
            self.lines.lock().unwrap().push(line.to_string());
        }

        fn on_command(&self, command: ProtocolCommand) {
            self.commands.lock().unwrap().push(command);
        }

        fn on_connect_status(&self, _connected: bool) {}
    }

    #[tokio::test]
    async fn connect_failure_is_reported_as_an_error() {
        let config = ConnectorConfig::new("127.0.0.1", 1); // nothing listening
        let connector = LineConnector::new(config);
        let sink: Arc<dyn LineSink> = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let err = connector.connect_and_serve(&sink, &cancel).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Connect(_)));
    }
}
