use thiserror::Error;

/// Every failure in the crate is fatal to the current run; callers only
/// propagate.
#[derive(Error, Debug)]
pub enum RxError {
    #[error("remote query error: {0}")]
    Remote(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("data shape error: {0}")]
    Data(String),

    #[error("chart error: {0}")]
    Chart(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RxError>;
