pub mod codec;
pub mod config;
pub mod events;
pub mod forest;
pub mod naming;
pub mod plan;
pub mod types;
pub mod validation;

pub use codec::*;
pub use config::*;
pub use events::*;
pub use forest::*;
pub use naming::*;
pub use plan::*;
pub use types::*;
pub use validation::*;
