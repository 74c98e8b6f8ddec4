//! Core of Lincona, an interactive coding-agent CLI: streaming model client,
//! tool execution layer, session persistence, and the conversation driver.
//! The terminal front-end lives in the `lincona-cli` crate.

pub mod boundary;
pub mod client;
pub mod client_common;
pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod models;
pub mod pty;
pub mod session;
pub mod session_log;
pub mod shutdown;
pub mod slash_command;
pub mod tools;
pub mod truncate;
mod util;

pub use client::ModelClient;
pub use driver::Driver;
pub use error::LinconaErr;
pub use error::Result;
