//! Role-specific sequencing on top of the orchestrator: how a receiver
//! becomes reachable and how a caller reaches it.

mod caller;
mod identity;
mod receiver;


pub use caller::{CallOutcome, CallTarget, CallerFlow};
pub use identity::{derive_receiver_id, ephemeral_id, ID_LEN};
pub use receiver::{ReceiverFlow, ReceiverSession, ReceiverStatus};
