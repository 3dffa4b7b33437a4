use std::future::Future;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures_util::FutureExt;
use log::error;

use crate::error::Error;
use crate::network::connection::Connection;
use crate::network::policy::Decision;

/// The callbacks of a protocol running on top of a [Server](crate::server::Server) or a
/// [Client](crate::client::Client).
///
/// The same trait serves plain TCP and TLS, servers and clients.
/// All callbacks of a single connection are invoked sequentially from the connection's own task.
/// A panicking callback is caught and treated like an error, i.e. the connection is closed
/// forcibly and [Process::on_close] still runs.
#[async_trait]
pub trait Process: Send + Sync + 'static {
    /// Called once the connection is established, before anything is read.
    ///
    /// Servers only make the connection visible to sends and broadcasts after this succeeded.
    /// Returning an error closes the connection forcibly, e.g. if the peer's certificate
    /// doesn't match some policy. [Process::on_close] is called in that case as well.
    async fn on_connect(&self, _connection: &Connection) -> Result<(), Error> {
        Ok(())
    }

    /// Called with all bytes that haven't been consumed yet, i.e. the previous leftover plus
    /// the newly received chunk.
    ///
    /// Implementations usually run [reassemble](crate::network::framing::reassemble) on the
    /// buffer, handle every complete frame, optionally reply via [Connection::write] and return
    /// the remaining bytes as leftover.
    /// An error is treated as a forcible close, no matter what.
    async fn on_receive(&self, connection: &Connection, buffer: Vec<u8>)
        -> Result<Decision, Error>;

    /// Called exactly once per connection, no matter how it ends,
    /// before the connection is closed and removed from the registry.
    async fn on_close(&self, _connection: &Connection) {}
}

/// Await a process callback. A panic becomes an [Error::Process].
pub(crate) async fn catch_panic<T, F>(
    connection: &Connection,
    callback: &str,
    future: F,
) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(_) => {
            error!("{callback} panicked for {}", connection.remote_address());
            Err(Error::Process(format!("{callback} panicked")))
        }
    }
}

/// Run [Process::on_close]. A panic is only logged, the connection is torn down regardless.
pub(crate) async fn close_callback<P: Process>(process: &P, connection: &Connection) {
    let on_close = async {
        process.on_close(connection).await;
        Ok::<(), Error>(())
    };
    let _ = catch_panic(connection, "on_close", on_close).await;
}
