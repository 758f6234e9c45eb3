//! Haulroute CLI library.
//!
//! Logging setup and output rendering shared by the `haulroute-cli` binary.

pub mod logging;
pub mod output;
