//! The `utils` module collects the pieces shared by the hub, the client and
//! the binary: error types and logging setup.

pub mod error;
pub mod logging;

pub use error::{ClientError, HubError, ParseError, ResolveError};
