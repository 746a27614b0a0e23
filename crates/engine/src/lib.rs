//! The constrained generation orchestrator for reqgate.
//!
//! `Engine` owns the draft → evaluate → revise state machine, the model
//! registry, and the live-session table. The fallback and loopback providers
//! live here too: both re-enter the orchestrator, so they sit above the
//! vendor adapters.

pub mod fallback;
pub mod loopback;
pub mod orchestrator;
pub mod registry;
pub mod session;

pub use fallback::FallbackProvider;
pub use loopback::LoopbackProvider;
pub use orchestrator::Engine;
pub use registry::Registry;
pub use session::{
    Choice, CompletionRequest, CompletionResponse, ErrorRecord, EvalLogEntry, Prospect,
    ProspectOutcome, RevisionInput, FINISH_ERROR, FINISH_ERROR_EVALUATING,
    FINISH_ERROR_GENERATING, FINISH_STOPPED,
};
