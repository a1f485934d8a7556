pub mod audit;
pub mod authority;
pub mod clock;
pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod flows;
pub mod invariants;
pub mod ledger;
pub mod notify;
pub mod proration;
pub mod store;

pub use audit::{AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use authority::{AuthorizationFailure, Operation, PermissionLevel, RoleAuthority};
pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::actor::{Actor, ActorId, Role};
pub use domain::campaign::{CampaignId, CampaignMetadata, GuaranteeUnit, RefundSettings};
pub use domain::quote_request::{BudgetType, QuoteRequest, QuoteRequestId, QuoteRequestStatus};
pub use domain::refund::{RefundOrigin, RefundRequest, RefundRequestId, RefundStatus};
pub use domain::slot::{GuaranteeSlot, SlotId, SlotStatus};
pub use domain::{EntityKind, EntityRef};
pub use engine::{RequestContext, WorkflowEngine};
pub use errors::{Dependency, InterfaceError, WorkflowError};
pub use invariants::{InvariantChecker, InvariantReport, InvariantViolation};
pub use ledger::{LedgerBalance, LedgerDirection, LedgerEntry};
pub use notify::{Notification, NotificationDispatcher, NotificationKind};
pub use proration::{ProrationBreakdown, ProrationCalculator, RefundPolicy};
pub use store::{CampaignDirectory, StoreError, WorkflowStore, WorkflowTransaction};
