//! Language runtime protocol
//!
//! Message records, the wire envelope, and the handful of rules that hold
//! regardless of which ecosystem an adapter serves.

pub mod diagnostic;
pub mod ipc;
pub mod legacy;
pub mod messages;
pub mod prompt;

pub use diagnostic::{Diagnostic, Diagnostics, Pos, Range, Severity};
pub use ipc::{Fault, FaultKind, LanguageCommand, LanguageResponse};
pub use legacy::ProgramTarget;
pub use messages::*;
pub use prompt::{RuntimeOptionPrompt, RuntimeOptionType, RuntimeOptionValue};
