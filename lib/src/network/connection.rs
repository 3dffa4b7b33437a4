//! A single live connection as seen by process callbacks and the registry.
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use log::debug;
use rustls::Certificate;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::Error;
use crate::network::policy::CloseMode;
use crate::network::socket::{GenericStream, Peer};

/// Lifecycle tag of a [Connection].
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum ConnectionState {
    /// Accepted, but the process hasn't validated the connection yet.
    /// Pending connections are invisible to targeted sends and broadcasts.
    Pending,
    /// Validated and serving.
    Active,
    /// Closed. Writes fail from now on.
    Closed,
}

/// The handle of a connection.
///
/// The read half of the stream is exclusively owned by the connection's receive loop.
/// The write half lives in here, so replies, targeted sends and broadcasts can share it.
pub struct Connection {
    remote_address: String,
    peer_certificates: Option<Vec<Certificate>>,
    writer: AsyncMutex<Option<WriteHalf<GenericStream>>>,
    state: Mutex<ConnectionState>,
    write_timeout: Option<Duration>,
}

impl Connection {
    pub(crate) fn new(
        peer: Peer,
        writer: WriteHalf<GenericStream>,
        write_timeout: Option<Duration>,
    ) -> Self {
        Connection {
            remote_address: peer.address.to_string(),
            peer_certificates: peer.certificates,
            writer: AsyncMutex::new(Some(writer)),
            state: Mutex::new(ConnectionState::Pending),
            write_timeout,
        }
    }

    /// The peer's address in `ip:port` notation. This is also the connection's registry key.
    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    /// The certificate chain the peer presented during the TLS handshake.
    /// `None` for plain TCP or if the peer didn't present a certificate.
    pub fn peer_certificates(&self) -> Option<&[Certificate]> {
        self.peer_certificates.as_deref()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    pub(crate) fn activate(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == ConnectionState::Pending {
            *state = ConnectionState::Active;
        }
    }

    /// Write all bytes to the peer.
    pub async fn write(&self, data: &[u8]) -> Result<(), Error> {
        let mut writer = self.writer.lock().await;
        let writer = writer
            .as_mut()
            .ok_or_else(|| Error::ConnectionClosed(self.remote_address.clone()))?;

        let action = format!("writing to {}", self.remote_address);
        with_deadline(self.write_timeout, &action, async {
            writer.write_all(data).await?;
            writer.flush().await
        })
        .await?;
        debug!("Sent {} bytes to {}", data.len(), self.remote_address);

        Ok(())
    }

    /// Close the write side of the connection. Calling this multiple times is fine.
    ///
    /// The socket is fully released, once the receive loop drops its read half.
    pub(crate) async fn close(&self, mode: CloseMode) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = ConnectionState::Closed;

        let Some(mut writer) = self.writer.lock().await.take() else {
            return;
        };

        if mode == CloseMode::Graceful {
            let action = format!("shutting down {}", self.remote_address);
            if let Err(err) = with_deadline(self.write_timeout, &action, writer.shutdown()).await {
                debug!("Graceful shutdown failed: {err}");
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("remote_address", &self.remote_address)
            .field("state", &self.state())
            .finish()
    }
}

/// Run an I/O future with an optional deadline.
pub(crate) async fn with_deadline<T, F>(
    deadline: Option<Duration>,
    action: &str,
    future: F,
) -> Result<T, Error>
where
    F: Future<Output = Result<T, std::io::Error>>,
{
    let result = match deadline {
        Some(deadline) => tokio::time::timeout(deadline, future)
            .await
            .map_err(|_| Error::Timeout(action.to_string(), deadline))?,
        None => future.await,
    };

    result.map_err(|err| Error::IoError(action.to_string(), err))
}

#[cfg(test)]
mod test {
    use tokio::io::AsyncReadExt;

    use super::*;

    fn duplex_connection() -> (Connection, tokio::io::DuplexStream) {
        let (ours, theirs) = tokio::io::duplex(64);
        let stream: GenericStream = Box::new(ours);
        let (_, writer) = tokio::io::split(stream);
        let peer = Peer {
            address: "127.0.0.1:4000".parse().unwrap(),
            certificates: None,
        };

        (
            Connection::new(peer, writer, Some(Duration::from_millis(200))),
            theirs,
        )
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let (connection, _peer) = duplex_connection();
        assert_eq!(connection.state(), ConnectionState::Pending);
        assert_eq!(connection.remote_address(), "127.0.0.1:4000");

        connection.activate();
        assert!(connection.is_active());

        connection.close(CloseMode::Graceful).await;
        assert_eq!(connection.state(), ConnectionState::Closed);

        // A closed connection can't be revived.
        connection.activate();
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_write_and_close() {
        let (connection, mut peer) = duplex_connection();
        connection.write(b"hello").await.unwrap();

        let mut buffer = [0; 5];
        peer.read_exact(&mut buffer).await.unwrap();
        assert_eq!(&buffer, b"hello");

        connection.close(CloseMode::Graceful).await;
        // Closing twice is fine.
        connection.close(CloseMode::Forcible).await;

        assert!(matches!(
            connection.write(b"again").await,
            Err(Error::ConnectionClosed(_))
        ));
        // The peer sees a clean EOF.
        assert_eq!(peer.read(&mut buffer).await.unwrap(), 0);
    }

    /// A peer that doesn't read stalls our writes, which the deadline cuts off.
    #[tokio::test]
    async fn test_write_deadline() {
        let (connection, _peer) = duplex_connection();
        let result = connection.write(&[0; 1024]).await;

        assert!(matches!(result, Err(Error::Timeout(_, _))));
    }
}
