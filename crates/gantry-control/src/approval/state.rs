//! Typestate pattern for the approval state machine.
//!
//! An approval starts `Pending` and takes exactly one transition into a
//! terminal state. Terminal states expose no transitions, so reopening a
//! resolved approval does not compile.
//!
//! # Example
//!
//! ```ignore
//! let pending = Approval::<Pending>::create(request);
//! let approved = pending.approve("lead1");
//! // approved.expire() would not compile - the approval is already resolved
//! ```

use std::marker::PhantomData;

use chrono::Utc;

use crate::types::{ApprovalId, ApprovalRequest, ApprovalState, Decision};

// =============================================================================
// State marker types (zero-sized)
// =============================================================================

/// Marker trait for approval states.
pub trait ApprovalPhase: private::Sealed + Send + Sync {
    /// Get the runtime state representation.
    fn state() -> ApprovalState;
}

mod private {
    pub trait Sealed {}
}

/// Waiting for an approver or the deadline.
#[derive(Debug, Clone, Copy)]
pub struct Pending;

/// An approver allowed the action.
#[derive(Debug, Clone, Copy)]
pub struct Approved;

/// An approver refused the action.
#[derive(Debug, Clone, Copy)]
pub struct Rejected;

/// The deadline passed without a decision.
#[derive(Debug, Clone, Copy)]
pub struct Expired;

impl private::Sealed for Pending {}
impl private::Sealed for Approved {}
impl private::Sealed for Rejected {}
impl private::Sealed for Expired {}

impl ApprovalPhase for Pending {
    fn state() -> ApprovalState {
        ApprovalState::Pending
    }
}

impl ApprovalPhase for Approved {
    fn state() -> ApprovalState {
        ApprovalState::Approved
    }
}

impl ApprovalPhase for Rejected {
    fn state() -> ApprovalState {
        ApprovalState::Rejected
    }
}

impl ApprovalPhase for Expired {
    fn state() -> ApprovalState {
        ApprovalState::Expired
    }
}

// =============================================================================
// Approval struct parameterised by state
// =============================================================================

/// An approval request in a specific state.
#[derive(Debug, Clone)]
pub struct Approval<S: ApprovalPhase> {
    request: ApprovalRequest,
    _state: PhantomData<S>,
}

impl<S: ApprovalPhase> Approval<S> {
    /// Get a reference to the request data.
    #[must_use]
    pub const fn request(&self) -> &ApprovalRequest {
        &self.request
    }

    /// Get the approval ID.
    #[must_use]
    pub const fn id(&self) -> &ApprovalId {
        &self.request.id
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> ApprovalState {
        S::state()
    }

    /// Convert into the underlying request (consuming the approval).
    #[must_use]
    pub fn into_request(self) -> ApprovalRequest {
        self.request
    }

    fn transition<T: ApprovalPhase>(mut self, resolved_by: Option<&str>) -> Approval<T> {
        self.request.state = T::state();
        self.request.resolved_by = resolved_by.map(ToOwned::to_owned);
        self.request.resolved_at = Some(Utc::now());
        Approval {
            request: self.request,
            _state: PhantomData,
        }
    }
}

// =============================================================================
// State transitions
// =============================================================================

impl Approval<Pending> {
    /// Wrap a freshly created request in the pending state.
    ///
    /// Whatever state the request carried is overwritten with `Pending`.
    #[must_use]
    pub fn create(mut request: ApprovalRequest) -> Self {
        request.state = ApprovalState::Pending;
        request.resolved_by = None;
        request.resolved_at = None;
        Self {
            request,
            _state: PhantomData,
        }
    }

    /// Transition to the approved state.
    #[must_use]
    pub fn approve(self, approver: &str) -> Approval<Approved> {
        self.transition(Some(approver))
    }

    /// Transition to the rejected state.
    #[must_use]
    pub fn reject(self, approver: &str) -> Approval<Rejected> {
        self.transition(Some(approver))
    }

    /// Transition to the expired state. Nobody resolves an expiry.
    #[must_use]
    pub fn expire(self) -> Approval<Expired> {
        self.transition(None)
    }

    /// Apply an approver's decision.
    #[must_use]
    pub fn decide(self, decision: Decision, approver: &str) -> ResolvedApproval {
        match decision {
            Decision::Approve => ResolvedApproval::Approved(self.approve(approver)),
            Decision::Reject => ResolvedApproval::Rejected(self.reject(approver)),
        }
    }
}

/// An approval that has left `Pending`.
#[derive(Debug, Clone)]
pub enum ResolvedApproval {
    /// Approved by a person.
    Approved(Approval<Approved>),
    /// Rejected by a person.
    Rejected(Approval<Rejected>),
    /// Expired at the deadline.
    Expired(Approval<Expired>),
}

impl ResolvedApproval {
    /// Get a reference to the request data.
    #[must_use]
    pub const fn request(&self) -> &ApprovalRequest {
        match self {
            Self::Approved(a) => a.request(),
            Self::Rejected(a) => a.request(),
            Self::Expired(a) => a.request(),
        }
    }

    /// Get the terminal state.
    #[must_use]
    pub const fn state(&self) -> ApprovalState {
        match self {
            Self::Approved(_) => ApprovalState::Approved,
            Self::Rejected(_) => ApprovalState::Rejected,
            Self::Expired(_) => ApprovalState::Expired,
        }
    }

    /// Convert into the underlying request.
    #[must_use]
    pub fn into_request(self) -> ApprovalRequest {
        match self {
            Self::Approved(a) => a.into_request(),
            Self::Rejected(a) => a.into_request(),
            Self::Expired(a) => a.into_request(),
        }
    }
}
