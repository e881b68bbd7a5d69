use thiserror::Error;

use crate::url::UrlError;

/// Failure binding a listening socket (spec §7: "reported to caller; no
/// partial state retained").
#[derive(Debug, Error)]
pub enum BindError {
    #[error(transparent)]
    Url(#[from] UrlError),
    #[error("failed to bind/listen: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure connecting a client (spec §7, same policy as `BindError`).
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Url(#[from] UrlError),
    #[error("failed to connect: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure running `provide_service` to completion. Only initialization
/// (bind/listen) failures are fatal for the server (spec §7: "Fatal
/// conditions for the server are restricted to initialization failures").
#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error("event loop failed: {0}")]
    Io(#[from] std::io::Error),
}
