//! The governed think-act loop of helmsman.
//!
//! A session follows a **Think → Gate → Act → Observe** cycle:
//!
//! 1. **Assemble** the opening context (instructions, permitted tools,
//!    recalled memories, the task)
//! 2. **Think**: send the context to the model through the resolver
//! 3. **Gate** every requested action against policy, suspending for human
//!    approval where a policy demands it
//! 4. **Act**: execute allowed actions, each under a timeout
//! 5. **Observe**: append the results and loop back to step 2
//!
//! The loop ends when the model answers with text, or at the iteration
//! limit, the session timeout, an abort, or an unrecoverable error.

pub mod completion;
pub mod context;
pub mod control;
pub mod engine;
pub mod gate;
pub mod hooks;
pub mod kernel;
pub mod parser;
pub mod testing;

pub use completion::CompletionDetector;
pub use context::{ContextAssembler, ContextGuard};
pub use control::LoopControl;
pub use engine::LoopEngine;
pub use gate::{
    ApprovalDecision, ApprovalQueue, ApprovalRequest, ApprovalRequester, GateRequest, GateVerdict,
    PolicyGate,
};
pub use hooks::{EventBusHooks, LoopHooks};
pub use kernel::{Kernel, KernelError};
pub use parser::ParsedReply;
