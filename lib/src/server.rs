//! The accepting side of the engine.
//!
//! ```text
//! Listening → Accepted → Validating (on_connect) → Serving → Closed
//! ```
//!
//! Every accepted connection gets its own task, which exclusively owns the connection's read
//! half. That task reads into a scratch buffer, prepends the previous leftover and hands
//! everything to [Process::on_receive]. The returned [Decision] decides whether we continue.
use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::net::TcpStream;

use crate::error::Error;
use crate::network::connection::{with_deadline, Connection};
use crate::network::policy::{CloseMode, ConnectPolicy, Decision};
use crate::network::process::{catch_panic, close_callback, Process};
use crate::network::registry::ConnectionRegistry;
use crate::network::shutdown::{Shutdown, ShutdownSignal};
use crate::network::socket::{get_listener, GenericListener, GenericStream};
use crate::settings::{Settings, Shared};

/// A bound server. Call [Server::run] to start accepting connections.
pub struct Server<P: Process> {
    listener: GenericListener,
    process: Arc<P>,
    registry: Arc<ConnectionRegistry>,
    shared: Shared,
    shutdown: Shutdown,
}

impl<P: Process> Server<P> {
    /// Bind the listener. For TLS, the certificates, key and CA bundle are loaded right away.
    pub async fn bind(settings: &Settings, process: P) -> Result<Self, Error> {
        Self::bind_with_registry(settings, process, Arc::new(ConnectionRegistry::new())).await
    }

    /// Like [Server::bind], but with a registry the process already knows about.
    /// That's necessary if the process wants to send to other connections.
    pub async fn bind_with_registry(
        settings: &Settings,
        process: P,
        registry: Arc<ConnectionRegistry>,
    ) -> Result<Self, Error> {
        let listener = get_listener(&settings.server).await?;
        info!(
            "Listening on {} ({})",
            listener.local_addr()?,
            if settings.server.tls.is_some() {
                "tls"
            } else {
                "tcp"
            }
        );

        Ok(Server {
            listener,
            process: Arc::new(process),
            registry,
            shared: settings.shared.clone(),
            shutdown: Shutdown::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    /// A handle to stop the accept loop and all connections.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Poll the listener and accept new incoming connections.
    /// Each connection is handled on its own task.
    ///
    /// This only returns once the shutdown has been triggered.
    pub async fn run(self) -> Result<(), Error> {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            let accepted = tokio::select! {
                _ = shutdown.wait() => break,
                accepted = self.listener.accept() => accepted,
            };

            let (stream, address) = match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!("Failed accepting connection: {err}");
                    continue;
                }
            };
            debug!("Accepted TCP connection from {address}");

            let handler = ConnectionHandler {
                listener: self.listener.clone(),
                process: self.process.clone(),
                registry: self.registry.clone(),
                shared: self.shared.clone(),
                shutdown: self.shutdown.subscribe(),
            };
            tokio::spawn(handler.handle(stream, address));
        }

        info!("Stopped accepting connections");
        Ok(())
    }
}

/// Everything a connection's task needs.
struct ConnectionHandler<P: Process> {
    listener: GenericListener,
    process: Arc<P>,
    registry: Arc<ConnectionRegistry>,
    shared: Shared,
    shutdown: ShutdownSignal,
}

impl<P: Process> ConnectionHandler<P> {
    async fn handle(mut self, stream: TcpStream, address: SocketAddr) {
        let establish = self.listener.establish(stream, address);
        let established = match self.shared.connect_timeout() {
            Some(deadline) => tokio::time::timeout(deadline, establish)
                .await
                .unwrap_or_else(|_| Err(Error::Timeout("handshake".into(), deadline))),
            None => establish.await,
        };
        let (stream, peer) = match established {
            Ok(established) => established,
            Err(err) => {
                warn!("Failed to establish connection with {address}: {err}");
                return;
            }
        };

        let (reader, writer) = tokio::io::split(stream);
        let connection = Arc::new(Connection::new(peer, writer, self.shared.write_timeout()));

        // The connection is registered as pending, sends and broadcasts ignore it until the
        // process accepted it.
        self.registry.add(connection.clone());
        let on_connect = self.process.on_connect(&connection);
        let connected = catch_panic(&connection, "on_connect", on_connect).await;
        let mode = match connected {
            Ok(()) => {
                connection.activate();
                info!("New connection from {address}");
                self.serve(&connection, reader).await
            }
            Err(err) => {
                warn!("Rejected connection from {address}: {err}");
                CloseMode::Forcible
            }
        };

        // Every connection that made it into the registry leaves through here.
        close_callback(self.process.as_ref(), &connection).await;
        connection.close(mode).await;
        self.registry.remove(&connection);
        info!("Closed connection to {address} ({mode:?})");
    }

    /// The receive loop. Returns how the connection should be closed.
    async fn serve(&mut self, connection: &Connection, mut reader: ReadHalf<GenericStream>) -> CloseMode {
        let address = connection.remote_address();
        let read_timeout = self.shared.read_timeout();
        let mut scratch = vec![0; self.shared.read_buffer_size.max(1)];
        let mut leftover = Vec::new();

        loop {
            let read = tokio::select! {
                _ = self.shutdown.wait() => {
                    debug!("Shutting down connection to {address}");
                    return CloseMode::Graceful;
                }
                read = with_deadline(read_timeout, "reading from peer", reader.read(&mut scratch)) => read,
            };

            let received = match read {
                Ok(0) => {
                    info!("Peer {address} closed the connection");
                    return CloseMode::Graceful;
                }
                Ok(received) => received,
                Err(err) => {
                    warn!("Failed reading from {address}: {err}");
                    return CloseMode::Forcible;
                }
            };
            debug!("Received {received} bytes from {address}");

            leftover.extend_from_slice(&scratch[..received]);
            let buffer = std::mem::take(&mut leftover);
            let on_receive = self.process.on_receive(connection, buffer);
            match catch_panic(connection, "on_receive", on_receive).await {
                Ok(Decision {
                    connect_policy,
                    leftover: rest,
                    ..
                }) => {
                    leftover = rest;
                    if let ConnectPolicy::Close(mode) = connect_policy {
                        debug!("Process requested {mode:?} close of {address}");
                        return mode;
                    }
                }
                Err(err) => {
                    warn!("Processing data from {address} failed: {err}");
                    return CloseMode::Forcible;
                }
            }
        }
    }
}
