//! The dialing side of the engine.
//!
//! ```text
//! Disconnected → Connected → Running → Closed
//! ```
//!
//! A [Client] owns a one-slot mailbox into a single session task.
//! The session task handles one [Intent] at a time: it writes the payload and, for
//! [RwPolicy::WaitRead], reads until the process signals [RwPolicy::EndRead].
//! Only then is the next intent taken from the mailbox.
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::sync::{mpsc, oneshot};

use crate::error::Error;
use crate::network::connection::{with_deadline, Connection};
use crate::network::policy::{CloseMode, ConnectPolicy, Envelope, Intent, RwPolicy};
use crate::network::process::{catch_panic, close_callback, Process};
use crate::network::socket::{get_client_stream, GenericStream};
use crate::settings::Settings;

/// Handle to a client connection.
///
/// [Client::send_msg] and [Client::close] wait until the session task has fully handled the
/// intent, so two sequential calls never overlap.
/// Concurrent calls from multiple tasks are queued in no particular order.
pub struct Client {
    mailbox: mpsc::Sender<Envelope>,
    remote_address: String,
}

impl Client {
    /// Connect to the configured server and spawn the session task.
    pub async fn connect<P: Process>(settings: &Settings, process: P) -> Result<Self, Error> {
        let (stream, peer) = get_client_stream(&settings.shared, &settings.client).await?;
        let (reader, writer) = tokio::io::split(stream);
        let connection = Arc::new(Connection::new(
            peer,
            writer,
            settings.shared.write_timeout(),
        ));
        let remote_address = connection.remote_address().to_string();

        let on_connect = process.on_connect(&connection);
        if let Err(err) = catch_panic(&connection, "on_connect", on_connect).await {
            close_callback(&process, &connection).await;
            connection.close(CloseMode::Forcible).await;
            return Err(err);
        }
        connection.activate();
        info!("Connected to {remote_address}");

        let (mailbox, inbox) = mpsc::channel(1);
        let session = Session {
            connection,
            reader,
            process,
            inbox,
            scratch: vec![0; settings.shared.read_buffer_size.max(1)],
            leftover: Vec::new(),
            read_timeout: settings.shared.read_timeout(),
        };
        tokio::spawn(session.run());

        Ok(Client {
            mailbox,
            remote_address,
        })
    }

    /// Write a payload to the server.
    ///
    /// With [RwPolicy::WaitRead], this only returns once the response has been processed.
    pub async fn send_msg(&self, payload: Vec<u8>, rw_policy: RwPolicy) -> Result<(), Error> {
        self.dispatch(Intent::Send { payload, rw_policy }).await
    }

    /// Close the connection and stop the session task.
    pub async fn close(&self, mode: CloseMode) -> Result<(), Error> {
        self.dispatch(Intent::Close(mode)).await
    }

    /// Whether the session task has finished, i.e. the connection is gone.
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    async fn dispatch(&self, intent: Intent) -> Result<(), Error> {
        let (done, receipt) = oneshot::channel();
        self.mailbox
            .send(Envelope { intent, done })
            .await
            .map_err(|_| Error::ConnectionClosed(self.remote_address.clone()))?;

        receipt
            .await
            .map_err(|_| Error::ConnectionClosed(self.remote_address.clone()))?
    }
}

/// The single task that owns the client's stream.
struct Session<P: Process> {
    connection: Arc<Connection>,
    reader: ReadHalf<GenericStream>,
    process: P,
    inbox: mpsc::Receiver<Envelope>,
    scratch: Vec<u8>,
    leftover: Vec<u8>,
    read_timeout: Option<Duration>,
}

impl<P: Process> Session<P> {
    async fn run(mut self) {
        while let Some(Envelope { intent, done }) = self.inbox.recv().await {
            let outcome = match intent {
                Intent::Close(mode) => Ok(Some(mode)),
                Intent::Send { payload, rw_policy } => self.send_and_receive(&payload, rw_policy).await,
            };

            match outcome {
                Ok(None) => {
                    let _ = done.send(Ok(()));
                }
                Ok(Some(mode)) => {
                    self.finish(mode).await;
                    let _ = done.send(Ok(()));
                    return;
                }
                Err(err) => {
                    warn!("Connection to {} failed: {err}", self.connection.remote_address());
                    self.finish(CloseMode::Forcible).await;
                    let _ = done.send(Err(err));
                    return;
                }
            }
        }

        // All client handles are gone.
        self.finish(CloseMode::Graceful).await;
    }

    /// Returns how to close the connection, if it should be closed.
    async fn send_and_receive(
        &mut self,
        payload: &[u8],
        rw_policy: RwPolicy,
    ) -> Result<Option<CloseMode>, Error> {
        self.connection.write(payload).await?;

        if rw_policy != RwPolicy::WaitRead {
            return Ok(None);
        }

        self.receive().await
    }

    /// Read until the process is done with the response.
    async fn receive(&mut self) -> Result<Option<CloseMode>, Error> {
        loop {
            let reader = &mut self.reader;
            let scratch = &mut self.scratch;
            let received =
                with_deadline(self.read_timeout, "reading response", reader.read(scratch)).await?;

            if received == 0 {
                info!("Server {} closed the connection", self.connection.remote_address());
                return Ok(Some(CloseMode::Graceful));
            }
            debug!(
                "Received {received} bytes from {}",
                self.connection.remote_address()
            );

            self.leftover.extend_from_slice(&self.scratch[..received]);
            let buffer = std::mem::take(&mut self.leftover);
            let on_receive = self.process.on_receive(&self.connection, buffer);
            let decision = catch_panic(&self.connection, "on_receive", on_receive).await?;
            self.leftover = decision.leftover;

            if let ConnectPolicy::Close(mode) = decision.connect_policy {
                return Ok(Some(mode));
            }
            if decision.rw_policy == RwPolicy::EndRead {
                return Ok(None);
            }
        }
    }

    /// Runs exactly once at the end of the session.
    async fn finish(&mut self, mode: CloseMode) {
        // Reject intents that are queued or arrive from now on.
        self.inbox.close();

        close_callback(&self.process, &self.connection).await;
        self.connection.close(mode).await;
        info!(
            "Closed connection to {} ({mode:?})",
            self.connection.remote_address()
        );
    }
}
