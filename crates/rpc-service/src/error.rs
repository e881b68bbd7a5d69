use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload of {got} bytes does not decode as a valid message")]
    Malformed { got: usize },
}
