pub mod engine;
pub mod quote_request;
pub mod refund;
pub mod slot;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, Transition};
pub use quote_request::{QuoteRequestEvent, QuoteRequestFlow};
pub use refund::{RefundEvent, RefundFlow};
pub use slot::{SlotEvent, SlotFlow};
pub use states::{FlowAction, FlowContext, FlowLabel, FlowType, TransitionOutcome};
