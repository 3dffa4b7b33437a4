use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Couldn't find or open file: {}", .0)]
    FileNotFound(String),

    #[error("Error while building path: {}", .0)]
    InvalidPath(String),

    /// Any errors regarding the certificate setup.
    #[error("Invalid or malformed certificate: {}", .0)]
    CertificateFailure(String),

    #[error("{}", .0)]
    Connection(String),

    /// The framing parameters themselves are inconsistent.
    #[error("Invalid framing parameters: {}", .0)]
    InvalidFraming(String),

    /// The peer sent a length field we refuse to work with.
    /// There's no resynchronization, the stream is considered corrupt.
    #[error("Malformed frame: {}", .0)]
    MalformedFrame(String),

    #[error("Connection to {} is already closed", .0)]
    ConnectionClosed(String),

    #[error("No active connection with address {}", .0)]
    UnknownConnection(String),

    #[error("Broadcast failed for {} of {} connections", .failed, .attempted)]
    Broadcast { failed: usize, attempted: usize },

    #[error("Timed out after {:?} while {}", .1, .0)]
    Timeout(String, std::time::Duration),

    /// Returned by process callbacks to reject or abort a connection.
    #[error("Process callback failed: {}", .0)]
    Process(String),

    #[error("Error while reading configuration:\n{}", .0)]
    ConfigDeserialization(String),

    #[error("Some error occurred. {}", .0)]
    Generic(String),

    #[error("I/O error while {}:\n{}", .0, .1)]
    IoError(String, std::io::Error),

    #[error("Unexpected I/O error:\n{}", .0)]
    RawIoError(#[from] std::io::Error),

    #[error("I/O error at path {:?} while {}:\n{}", .0, .1, .2)]
    IoPathError(PathBuf, &'static str, std::io::Error),
}
