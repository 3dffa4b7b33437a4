//! Everything that's necessary to turn a socket into a stream of PDUs.
//!
//! ## Sockets
//!
//! Connections are either plain TCP or TLS encrypted TCP.
//! TLS servers can additionally require clients to present a certificate signed by a
//! configured CA bundle (mutual authentication).
//! Both variants are hidden behind the [socket::Stream] trait, so the rest of the engine
//! doesn't care which one it's talking to.
//!
//! ## Framing
//!
//! A socket delivers byte chunks of arbitrary size. [framing::reassemble] extracts complete
//! frames from `leftover + new chunk`, based on a big-endian length field at a fixed offset
//! of the frame header.
//!
//! ## Lifecycle
//!
//! Protocols implement the [process::Process] trait.
//! After every callback, the returned [policy::Decision] tells the engine whether to keep
//! reading, to stop reading (clients) or to close the connection gracefully or forcibly.
//!
//! Servers keep all live connections in a [registry::ConnectionRegistry], which allows
//! targeted sends and broadcasts.

/// Used to bootstrap self-signed TLS certificates.
pub mod certificate;
/// The connection handle passed to process callbacks.
pub mod connection;
/// Length-field based frame reassembly.
pub mod framing;
/// Control decisions returned by process callbacks.
pub mod policy;
/// The callback trait protocols implement.
pub mod process;
/// The table of live server connections.
pub mod registry;
/// Stopping servers.
pub mod shutdown;
/// Listener and stream abstractions for plain TCP and TLS.
pub mod socket;
/// Helper functions for reading and handling TLS files.
mod tls;
