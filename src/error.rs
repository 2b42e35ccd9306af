use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no depth camera device found")]
    NoDevice,

    #[error("device exposes no color stream")]
    NoColorStream,

    #[error("sensor runtime error: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, Error>;
