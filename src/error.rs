//! Main Crate Error

#[derive(thiserror::Error, Debug)]
/// Kadlite crate error enum.
pub enum Error {
    /// Ids have to be exactly [ID_SIZE](crate::common::ID_SIZE) bytes.
    #[error("Invalid Id size, expected 32 bytes, got {0}")]
    InvalidIdSize(usize),

    /// Ids travel as hex strings.
    #[error("Invalid Id encoding: {0}")]
    InvalidIdHex(#[from] hex::FromHexError),

    /// Errors related to parsing DHT messages.
    #[error("Failed to parse packet bytes: {0}")]
    Json(#[from] serde_json::Error),

    /// Hosts on the wire have to be ip addresses, or empty.
    #[error("Invalid host, expected an ip address, got {0:?}")]
    InvalidHost(String),

    /// A message is missing a field its command requires.
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),
}

/// Alias for `Result<T, kadlite::Error>`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
