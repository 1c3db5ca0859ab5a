use thiserror::Error;

use crate::lifecycle::LifecycleState;
use crate::Address;

/// Reasons a lifecycle transition is refused.
///
/// Every variant means the transition was not applied: the stream passed in
/// is untouched and its pre-transition classification still holds.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StreamError {
    /// The caller is not a party to the stream, or not the party the
    /// operation requires (only the recipient may accept or claim).
    #[error("{caller} is not authorized for this operation")]
    NotAuthorized { caller: Address },

    #[error("stream already accepted")]
    AlreadyAccepted,

    #[error("nothing to claim")]
    NothingToClaim,

    /// The stream is `Completed` (and drained) or `Cancelled`.
    #[error("stream is {0}")]
    StreamTerminated(LifecycleState),

    /// Rejected at construction; never produced by a transition.
    #[error("invalid stream parameters: {0}")]
    InvalidStreamParameters(&'static str),
}
