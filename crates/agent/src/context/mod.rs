//! The working context of a session.
//!
//! | Piece | Role |
//! |-------|------|
//! | [`ContextAssembler`] | Builds the opening turns, appends the rest |
//! | [`ContextGuard`] | Detects window pressure and compacts the middle |
//! | [`token`] | Character-based token estimates |

pub mod assembler;
pub mod guard;
pub mod token;

pub use assembler::ContextAssembler;
pub use guard::ContextGuard;
