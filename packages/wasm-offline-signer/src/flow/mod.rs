//! Signing flow
//!
//! A session walks `SelectTarget → Form → WrapAndEstimate → Confirm →
//! TransportToSigner → AwaitSignature → Submit → Done`, or leaves `Confirm`
//! for the basket. [`FlowMachine`] holds the transitions, [`FlowDriver`]
//! runs their side effects, and [`FlowRegistry`] keeps one session per
//! wallet.

mod driver;
mod machine;
mod registry;
mod session;
mod step;

pub use driver::{FlowDriver, FlowUpdate};
pub use machine::{Effect, FlowEvent, FlowMachine, FlowOutcome};
pub use registry::FlowRegistry;
pub use session::{ScanProgress, SessionId, SessionSnapshot, SigningSession};
pub use step::Step;
