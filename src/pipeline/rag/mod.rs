pub mod retrieval;

pub use retrieval::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Message is safe to show to an end user; detail goes to the log.
    #[error("Knowledge base is unavailable, please try again later")]
    StoreUnavailable,
}
