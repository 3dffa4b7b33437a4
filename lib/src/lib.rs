//! Pdu-transport turns TCP and TLS byte streams into discrete protocol data units.
//!
//! It contains:
//!
//! - The [reassemble](network::framing::reassemble) function, which extracts length-delimited
//!   frames from arbitrarily chunked input.
//! - A [Server](server::Server), that accepts plain or mutually authenticated TLS connections
//!   and runs one receive loop per connection.
//! - A [Client](client::Client), that dials a server and serializes outbound messages through a
//!   single-slot mailbox.
//! - The [Process](network::process::Process) trait, which is how protocols plug into both.
//!
//! What the frames mean is entirely up to the protocol implementing the process.

pub mod client;
/// Pdu-transport's own Error implementation.
pub mod error;
pub mod network;
/// This module contains all default values of our setting representation.
mod setting_defaults;
/// Configuration of servers and clients, including their default values.
pub mod settings;
pub mod server;

pub use client::Client;
pub use error::Error;
pub use server::Server;
