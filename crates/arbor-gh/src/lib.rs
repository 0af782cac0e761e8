pub mod client;
pub mod command;
pub mod error;
pub mod types;

pub use client::*;
pub use command::*;
pub use error::*;
pub use types::*;
