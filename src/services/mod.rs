//! Services module for the payment return flow

pub mod order_state_machine;
pub mod return_flow;
pub mod verification_poller;

pub use order_state_machine::{OrderStateMachine, SettlementFacts};
pub use return_flow::{
    CallbackDisposition, CallbackOutcome, CallbackSettings, PaymentRedirect, RequestContext,
    ReturnFlowService,
};
pub use verification_poller::{PollError, PollPolicy, VerificationPoller, VerifyPhase};
