pub mod constants;
pub mod cycle;
pub mod error;
pub mod participant;
pub mod queue;
pub mod types;

pub use constants::*;
pub use cycle::{CycleParams, StageTransition, TerminalPolicy};
pub use error::AmigaError;
pub use participant::*;
pub use types::*;
