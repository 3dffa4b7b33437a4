//! The control decisions a [Process](crate::network::process::Process) hands back to the
//! connection engine after each callback.
use tokio::sync::oneshot;

use crate::error::Error;

/// How a connection is torn down.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum CloseMode {
    /// Flush pending writes and shut the stream down properly (TLS close_notify included).
    Graceful,
    /// Drop the stream immediately. Used for errors and protocol violations.
    Forcible,
}

/// What should happen with the connection after the current callback.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum ConnectPolicy {
    /// Keep the connection and continue reading.
    Keep,
    /// Close the connection. No further reads are attempted.
    Close(CloseMode),
}

impl ConnectPolicy {
    pub const CLOSE_GRACEFUL: ConnectPolicy = ConnectPolicy::Close(CloseMode::Graceful);
    pub const CLOSE_FORCIBLE: ConnectPolicy = ConnectPolicy::Close(CloseMode::Forcible);

    pub fn is_close(&self) -> bool {
        matches!(self, ConnectPolicy::Close(_))
    }
}

/// Client side read/write behavior.
///
/// When sending, this decides whether the client waits for a response.
/// When receiving, [RwPolicy::EndRead] tells the client that the response is complete.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default)]
pub enum RwPolicy {
    #[default]
    All,
    /// Block after the write until the response has been read.
    WaitRead,
    /// Don't read, wait for the next outbound message instead.
    WaitWrite,
    /// The response is complete, stop reading.
    EndRead,
}

/// The answer of a [Process::on_receive](crate::network::process::Process::on_receive) call.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Decision {
    pub connect_policy: ConnectPolicy,
    /// Only interpreted by clients.
    pub rw_policy: RwPolicy,
    /// Bytes which couldn't be resolved into a complete frame yet.
    pub leftover: Vec<u8>,
}

impl Decision {
    /// Keep the connection open and continue reading.
    pub fn keep(leftover: Vec<u8>) -> Self {
        Decision {
            connect_policy: ConnectPolicy::Keep,
            rw_policy: RwPolicy::All,
            leftover,
        }
    }

    /// Close the connection after this callback.
    pub fn close(mode: CloseMode, leftover: Vec<u8>) -> Self {
        Decision {
            connect_policy: ConnectPolicy::Close(mode),
            rw_policy: RwPolicy::All,
            leftover,
        }
    }

    /// The complete response has been received. Clients stop reading.
    pub fn end_read(leftover: Vec<u8>) -> Self {
        Decision {
            connect_policy: ConnectPolicy::Keep,
            rw_policy: RwPolicy::EndRead,
            leftover,
        }
    }

    pub fn with_rw_policy(mut self, rw_policy: RwPolicy) -> Self {
        self.rw_policy = rw_policy;
        self
    }
}

/// A command for a client's sender loop.
#[derive(Debug)]
pub enum Intent {
    /// Write the payload. Afterwards read until [RwPolicy::EndRead], if `rw_policy`
    /// is [RwPolicy::WaitRead].
    Send { payload: Vec<u8>, rw_policy: RwPolicy },
    /// Close the connection and stop the sender loop.
    Close(CloseMode),
}

/// An [Intent] together with the channel that reports back once it has been fully handled.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub intent: Intent,
    pub done: oneshot::Sender<Result<(), Error>>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_close_constants() {
        assert!(ConnectPolicy::CLOSE_GRACEFUL.is_close());
        assert!(ConnectPolicy::CLOSE_FORCIBLE.is_close());
        assert!(!ConnectPolicy::Keep.is_close());
    }

    #[test]
    fn test_decision_constructors() {
        let decision = Decision::end_read(vec![1]);
        assert_eq!(decision.connect_policy, ConnectPolicy::Keep);
        assert_eq!(decision.rw_policy, RwPolicy::EndRead);
        assert_eq!(decision.leftover, vec![1]);

        let decision = Decision::close(CloseMode::Forcible, Vec::new());
        assert_eq!(decision.connect_policy, ConnectPolicy::CLOSE_FORCIBLE);
    }
}
