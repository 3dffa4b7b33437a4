use std::convert::TryFrom;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use rustls::{Certificate, ServerName};
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use crate::error::Error;
use crate::network::connection::with_deadline;
use crate::network::tls::{get_tls_acceptor, get_tls_connector};
use crate::settings::{Client, Server, Shared};

/// Identity of the remote end of a stream.
#[derive(Clone, Debug)]
pub struct Peer {
    pub address: SocketAddr,
    /// The certificate chain presented during the TLS handshake, if any.
    pub certificates: Option<Vec<Certificate>>,
}

/// A new trait, which can be used to represent plain and TLS encrypted TcpListeners. \
/// This is necessary to easily write generic functions where both types can be used.
///
/// Accepting is split in two steps.
/// [Listener::accept] only accepts the TCP connection, so a slow TLS handshake can't block
/// the accept loop. [Listener::establish] then runs on the connection's own task.
#[async_trait]
pub trait Listener: Sync + Send {
    async fn accept(&self) -> Result<(TcpStream, SocketAddr), Error>;

    async fn establish(
        &self,
        stream: TcpStream,
        address: SocketAddr,
    ) -> Result<(GenericStream, Peer), Error>;

    fn local_addr(&self) -> Result<SocketAddr, Error>;
}

/// Plain TCP without any encryption.
pub(crate) struct PlainTcpListener {
    tcp_listener: TcpListener,
    keepalive: Option<Duration>,
}

#[async_trait]
impl Listener for PlainTcpListener {
    async fn accept(&self) -> Result<(TcpStream, SocketAddr), Error> {
        Ok(self.tcp_listener.accept().await?)
    }

    async fn establish(
        &self,
        stream: TcpStream,
        address: SocketAddr,
    ) -> Result<(GenericStream, Peer), Error> {
        enable_keepalive(&stream, self.keepalive);

        let peer = Peer {
            address,
            certificates: None,
        };
        Ok((Box::new(stream), peer))
    }

    fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.tcp_listener.local_addr()?)
    }
}

/// This is a helper struct for TLS encrypted TCP connections.
/// It encapsulates the logic of accepting a new connection and initializing the TLS layer
/// on top of it.
pub(crate) struct TlsTcpListener {
    tcp_listener: TcpListener,
    tls_acceptor: TlsAcceptor,
    keepalive: Option<Duration>,
}

#[async_trait]
impl Listener for TlsTcpListener {
    async fn accept(&self) -> Result<(TcpStream, SocketAddr), Error> {
        Ok(self.tcp_listener.accept().await?)
    }

    async fn establish(
        &self,
        stream: TcpStream,
        address: SocketAddr,
    ) -> Result<(GenericStream, Peer), Error> {
        // Keepalive is configured right before the handshake.
        enable_keepalive(&stream, self.keepalive);

        let stream = self
            .tls_acceptor
            .accept(stream)
            .await
            .map_err(|err| Error::Connection(format!("TLS handshake with {address} failed: {err}")))?;

        let certificates = stream
            .get_ref()
            .1
            .peer_certificates()
            .map(|chain| chain.to_vec());
        debug!(
            "TLS handshake with {address} done, {} peer certificates",
            certificates.as_ref().map_or(0, Vec::len)
        );

        let peer = Peer {
            address,
            certificates,
        };
        Ok((Box::new(stream), peer))
    }

    fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.tcp_listener.local_addr()?)
    }
}

/// A new trait, which can be used to represent plain and Tls encrypted TcpStreams. \
/// This is necessary to write generic functions where both types can be used.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl Stream for TcpStream {}
impl Stream for DuplexStream {}
impl Stream for tokio_rustls::server::TlsStream<TcpStream> {}
impl Stream for tokio_rustls::client::TlsStream<TcpStream> {}

/// Convenience type, so we don't have type write `Arc<dyn Listener>` all the time.
pub type GenericListener = Arc<dyn Listener>;
/// Convenience type, so we don't have type write `Box<dyn Stream>` all the time. \
/// This also prevents name collisions, since `Stream` is imported in many preludes.
pub type GenericStream = Box<dyn Stream>;

/// Failing to set keepalive isn't fatal, the connection simply works without it.
fn enable_keepalive(stream: &TcpStream, idle: Option<Duration>) {
    let Some(idle) = idle else {
        return;
    };

    let keepalive = TcpKeepalive::new().with_time(idle);
    if let Err(err) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
        warn!("Failed to enable TCP keepalive: {err}");
    }
}

/// Get a new stream for the client. \
/// This can either be a plain or a TLS encrypted TCPStream, depending on the settings.
pub async fn get_client_stream(
    shared: &Shared,
    settings: &Client,
) -> Result<(GenericStream, Peer), Error> {
    let address = settings.address();
    let tcp_stream = with_deadline(
        shared.connect_timeout(),
        &format!("connecting to {address}"),
        TcpStream::connect(&address),
    )
    .await
    .map_err(|err| Error::Connection(format!("Failed to connect to {address}: {err}")))?;
    let peer_address = tcp_stream.peer_addr()?;

    let Some(tls) = &settings.tls else {
        let peer = Peer {
            address: peer_address,
            certificates: None,
        };
        return Ok((Box::new(tcp_stream), peer));
    };

    // Get the configured rustls TlsConnector
    let tls_connector = get_tls_connector(tls)?;
    let server_name = ServerName::try_from(settings.server_name()).map_err(|_| {
        Error::Connection(format!("Invalid server name {}", settings.server_name()))
    })?;

    // Initialize the TLS layer
    let stream = with_deadline(
        shared.connect_timeout(),
        &format!("TLS handshake with {address}"),
        tls_connector.connect(server_name, tcp_stream),
    )
    .await
    .map_err(|err| Error::Connection(format!("Failed to initialize tls: {err}")))?;

    let certificates = stream
        .get_ref()
        .1
        .peer_certificates()
        .map(|chain| chain.to_vec());
    let peer = Peer {
        address: peer_address,
        certificates,
    };

    Ok((Box::new(stream), peer))
}

/// Get a new listener for the server. \
/// This can either be a plain or a TLS encrypted TCP listener, depending on the settings.
pub async fn get_listener(settings: &Server) -> Result<GenericListener, Error> {
    // This is the listener, which accepts low-level TCP connections
    let address = settings.address();
    let tcp_listener = TcpListener::bind(&address)
        .await
        .map_err(|err| Error::IoError(format!("binding to {address}"), err))?;

    let Some(tls) = &settings.tls else {
        return Ok(Arc::new(PlainTcpListener {
            tcp_listener,
            keepalive: settings.keepalive(),
        }));
    };

    // This is the TLS acceptor, which initializes the TLS layer
    let tls_acceptor = get_tls_acceptor(tls, settings.verify_client)?;

    // Create a struct, which accepts connections and initializes a TLS layer in one go.
    Ok(Arc::new(TlsTcpListener {
        tcp_listener,
        tls_acceptor,
        keepalive: settings.keepalive(),
    }))
}
