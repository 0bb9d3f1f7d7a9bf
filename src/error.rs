use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("brute force exhausted: {0}")]
    Exhausted(String),

    #[error("unknown gadget: {0}")]
    UnknownGadget(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
