pub mod error;

pub use error::{QueryError, Result};
