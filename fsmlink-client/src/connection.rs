//! Connection to an interpreter.

use crate::error::ClientError;
use fsmlink_protocol::{encode_line, InboundMessage, LineDecoder, OutboundMessage};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Interpreter address.
    pub addr: SocketAddr,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Read buffer size.
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(5),
            read_buffer_size: 8192,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

}

/// A single connection to an interpreter.
///
/// Events arrive on the receiver returned by [`Connection::connect`]; the
/// channel closes when the interpreter closes the connection.
pub struct Connection {
    config: ConnectionConfig,
    writer: Mutex<Option<OwnedWriteHalf>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    connected: Arc<AtomicBool>,
}

impl Connection {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Connects and starts the read loop.
    pub async fn connect(&self) -> Result<mpsc::UnboundedReceiver<OutboundMessage>, ClientError> {
        if self.is_connected() {
            return Err(ClientError::AlreadyConnected);
        }

        tracing::debug!("Connecting to {}...", self.config.addr);
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.addr),
        )
        .await
        .map_err(|_| {
            tracing::debug!("Connection timeout");
            ClientError::Timeout
        })??;
        stream.set_nodelay(true).ok();

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();

        *self.writer.lock().await = Some(write_half);
        self.connected.store(true, Ordering::SeqCst);

        let connected = self.connected.clone();
        let buffer_size = self.config.read_buffer_size;
        let handle = tokio::spawn(async move {
            if let Err(e) = read_loop(read_half, tx, buffer_size).await {
                tracing::warn!("Read loop ended with error: {}", e);
            }
            connected.store(false, Ordering::SeqCst);
        });
        *self.reader.lock().await = Some(handle);

        tracing::debug!("Connected to {}", self.config.addr);
        Ok(rx)
    }

    /// Sends one command.
    pub async fn send(&self, message: &InboundMessage) -> Result<(), ClientError> {
        let bytes = encode_line(message)?;
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ClientError::NotConnected)?;
        writer.write_all(&bytes).await?;
        Ok(())
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        tracing::debug!("Closing connection...");
        self.connected.store(false, Ordering::SeqCst);

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }
}

/// Decodes interpreter events until end-of-stream. Lines that are not
/// known events are logged and skipped.
async fn read_loop<R>(
    mut reader: R,
    events: mpsc::UnboundedSender<OutboundMessage>,
    buffer_size: usize,
) -> Result<(), ClientError>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = LineDecoder::new();
    let mut buf = vec![0u8; buffer_size];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            tracing::debug!("read_loop: connection closed");
            return Ok(());
        }
        decoder.extend(&buf[..n]);

        loop {
            match decoder.decode_line::<OutboundMessage>() {
                Ok(Some(message)) => {
                    tracing::debug!("read_loop: received {}", message.type_name());
                    if events.send(message).is_err() {
                        // Receiver dropped; nobody is interested any more.
                        return Ok(());
                    }
                }
                Ok(None) => break,
                Err(e) => tracing::warn!("read_loop: skipping undecodable line: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_read_loop_forwards_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reader = Builder::new()
            .read(b"{\"type\":\"FSM_CONNECTED\",\"payload\":{\"message\":\"hi\"}}\n{\"type\":\"CUR")
            .read(b"RENT_STATE\",\"payload\":{\"name\":\"A\",\"is_finish\":false}}\n")
            .read(b"{\"type\":\"SOMETHING_ELSE\",\"payload\":{}}\n")
            .read(b"{\"type\":\"FSM_STUCK\",\"payload\":{\"state_name\":\"A\"}}\n")
            .build();

        read_loop(reader, tx, 16).await.unwrap();

        let mut types = Vec::new();
        while let Some(message) = rx.recv().await {
            types.push(message.type_name());
        }
        assert_eq!(types, vec!["FSM_CONNECTED", "CURRENT_STATE", "FSM_STUCK"]);
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let conn = Connection::new(ConnectionConfig::new("127.0.0.1:1".parse().unwrap()));
        assert!(!conn.is_connected());
        let err = conn.send(&InboundMessage::stop()).await.unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }
}
