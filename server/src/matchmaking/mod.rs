//! Random-Call Matching & Session Coordination
//!
//! Pairs strangers into one-on-one voice calls: FIFO queues with optional
//! language preferences, a read-then-claim matching engine, and a
//! `connecting -> connected -> ended` session lifecycle. All state lives in
//! the shared store so any server instance can serve any user.

pub mod engine;
pub mod error;
pub mod queue;
pub mod session;
pub mod types;

pub use engine::{ClaimedMatch, MatchEngine};
pub use error::{MatchError, MatchResult};
pub use queue::{EnqueueOutcome, QueueManager};
pub use session::SessionService;
pub use types::{CallSession, EndReason, Preferences, QueuedUser, SessionState};
