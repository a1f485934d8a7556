//! Role hierarchy and the per-operation authority table.
//!
//! Every mutating engine operation resolves its [`OperationPolicy`] here,
//! checks the actor's rank against the policy's minimum level, then checks
//! that the actor is the right party for the request in scope. Admin roles
//! bypass the party check.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::actor::{Actor, ActorId, Role};
use crate::domain::quote_request::QuoteRequest;

/// Minimum level an operation requires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    Member,
    Distributor,
    Admin,
}

impl PermissionLevel {
    fn min_rank(&self) -> u8 {
        match self {
            Self::Member => 1,
            Self::Distributor => 3,
            Self::Admin => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Distributor => "distributor",
            Self::Admin => "admin",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub role: Role,
    pub rank: u8,
    pub admin: bool,
    pub distributor: bool,
}

const ROLE_GRANTS: [RoleGrant; 6] = [
    RoleGrant { role: Role::Guest, rank: 0, admin: false, distributor: false },
    RoleGrant { role: Role::Advertiser, rank: 1, admin: false, distributor: false },
    RoleGrant { role: Role::Agency, rank: 2, admin: false, distributor: false },
    RoleGrant { role: Role::Distributor, rank: 3, admin: false, distributor: true },
    RoleGrant { role: Role::Operator, rank: 4, admin: true, distributor: true },
    RoleGrant { role: Role::Developer, rank: 5, admin: true, distributor: true },
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    CreateRequest,
    OpenNegotiation,
    AcceptRequest,
    RejectRequest,
    ReopenRequest,
    ExpireRequest,
    PurchaseRequest,
    ViewRequest,
    ApproveSlot,
    RejectSlot,
    CompleteSlot,
    CancelSlot,
    RequestRefund,
    ProposeRefund,
    ApproveRefund,
    RejectRefund,
    ConfirmRefund,
    DeclineRefund,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateRequest => "create_request",
            Self::OpenNegotiation => "open_negotiation",
            Self::AcceptRequest => "accept_request",
            Self::RejectRequest => "reject_request",
            Self::ReopenRequest => "reopen_request",
            Self::ExpireRequest => "expire_request",
            Self::PurchaseRequest => "purchase_request",
            Self::ViewRequest => "view_request",
            Self::ApproveSlot => "approve_slot",
            Self::RejectSlot => "reject_slot",
            Self::CompleteSlot => "complete_slot",
            Self::CancelSlot => "cancel_slot",
            Self::RequestRefund => "request_refund",
            Self::ProposeRefund => "propose_refund",
            Self::ApproveRefund => "approve_refund",
            Self::RejectRefund => "reject_refund",
            Self::ConfirmRefund => "confirm_refund",
            Self::DeclineRefund => "decline_refund",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of a request may perform an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    /// Level check only.
    Anyone,
    /// The buyer who authored the request.
    Buyer,
    /// The distributor assigned to the request.
    AssignedDistributor,
    /// The assigned distributor, or any distributor while none is assigned.
    ClaimingDistributor,
    /// Buyer or claiming distributor.
    Participant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationPolicy {
    pub operation: Operation,
    pub required: PermissionLevel,
    pub party: Party,
    /// Admin roles skip the party check unless this is false.
    pub admin_bypass: bool,
}

const fn policy(operation: Operation, required: PermissionLevel, party: Party) -> OperationPolicy {
    OperationPolicy { operation, required, party, admin_bypass: true }
}

const fn buyer_only(operation: Operation) -> OperationPolicy {
    OperationPolicy {
        operation,
        required: PermissionLevel::Member,
        party: Party::Buyer,
        admin_bypass: false,
    }
}

const OPERATION_POLICIES: [OperationPolicy; 18] = [
    policy(Operation::CreateRequest, PermissionLevel::Member, Party::Anyone),
    policy(Operation::OpenNegotiation, PermissionLevel::Distributor, Party::ClaimingDistributor),
    policy(Operation::AcceptRequest, PermissionLevel::Distributor, Party::AssignedDistributor),
    policy(Operation::RejectRequest, PermissionLevel::Distributor, Party::ClaimingDistributor),
    policy(Operation::ReopenRequest, PermissionLevel::Distributor, Party::AssignedDistributor),
    policy(Operation::ExpireRequest, PermissionLevel::Admin, Party::Anyone),
    policy(Operation::PurchaseRequest, PermissionLevel::Member, Party::Buyer),
    policy(Operation::ViewRequest, PermissionLevel::Member, Party::Participant),
    policy(Operation::ApproveSlot, PermissionLevel::Distributor, Party::AssignedDistributor),
    policy(Operation::RejectSlot, PermissionLevel::Distributor, Party::AssignedDistributor),
    policy(Operation::CompleteSlot, PermissionLevel::Distributor, Party::AssignedDistributor),
    policy(Operation::CancelSlot, PermissionLevel::Member, Party::Participant),
    policy(Operation::RequestRefund, PermissionLevel::Member, Party::Buyer),
    policy(Operation::ProposeRefund, PermissionLevel::Distributor, Party::AssignedDistributor),
    policy(Operation::ApproveRefund, PermissionLevel::Distributor, Party::AssignedDistributor),
    policy(Operation::RejectRefund, PermissionLevel::Distributor, Party::AssignedDistributor),
    buyer_only(Operation::ConfirmRefund),
    buyer_only(Operation::DeclineRefund),
];

/// The buyer/distributor pair an operation is scoped to.
#[derive(Clone, Copy, Debug)]
pub struct RequestScope<'a> {
    pub buyer: &'a ActorId,
    pub distributor: Option<&'a ActorId>,
}

impl<'a> RequestScope<'a> {
    pub fn of(request: &'a QuoteRequest) -> Self {
        Self { buyer: &request.user_id, distributor: request.distributor_id.as_ref() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthorizationFailure {
    InsufficientRole { role: Role, required: PermissionLevel },
    NotBuyer { actor: ActorId },
    NotAssignedDistributor { actor: ActorId },
    NotParticipant { actor: ActorId },
    MissingScope,
}

impl AuthorizationFailure {
    pub fn reason(&self) -> String {
        match self {
            Self::InsufficientRole { role, required } => {
                format!("role `{role}` does not satisfy required level `{}`", required.as_str())
            }
            Self::NotBuyer { actor } => {
                format!("actor `{actor}` is not the buyer of this request")
            }
            Self::NotAssignedDistributor { actor } => {
                format!("actor `{actor}` is not the distributor assigned to this request")
            }
            Self::NotParticipant { actor } => {
                format!("actor `{actor}` is neither buyer nor distributor of this request")
            }
            Self::MissingScope => "operation requires a request scope".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RoleAuthority;

impl RoleAuthority {
    pub fn grant(&self, role: Role) -> RoleGrant {
        ROLE_GRANTS
            .iter()
            .copied()
            .find(|grant| grant.role == role)
            .unwrap_or(RoleGrant { role, rank: 0, admin: false, distributor: false })
    }

    pub fn policy(&self, operation: Operation) -> OperationPolicy {
        OPERATION_POLICIES
            .iter()
            .copied()
            .find(|policy| policy.operation == operation)
            .unwrap_or(policy(operation, PermissionLevel::Admin, Party::Anyone))
    }

    pub fn is_admin(&self, actor: &Actor) -> bool {
        self.grant(actor.role).admin
    }

    pub fn is_distributor(&self, actor: &Actor) -> bool {
        self.grant(actor.role).distributor
    }

    /// Does the actor's role satisfy `required`?
    pub fn authorize(&self, actor: &Actor, required: PermissionLevel) -> bool {
        self.grant(actor.role).rank >= required.min_rank()
    }

    /// Admins always; non-admin distributors when assigned; everyone else
    /// when they authored the request.
    pub fn owns_or_assigned(&self, actor: &Actor, scope: &RequestScope<'_>) -> bool {
        let grant = self.grant(actor.role);
        if grant.admin {
            return true;
        }
        if grant.distributor {
            return scope.distributor == Some(&actor.id);
        }
        scope.buyer == &actor.id
    }

    /// Level check then party check for `operation`.
    pub fn check(
        &self,
        actor: &Actor,
        operation: Operation,
        scope: Option<&RequestScope<'_>>,
    ) -> Result<(), AuthorizationFailure> {
        let policy = self.policy(operation);
        if !self.authorize(actor, policy.required) {
            return Err(AuthorizationFailure::InsufficientRole {
                role: actor.role,
                required: policy.required,
            });
        }

        if policy.party == Party::Anyone || (policy.admin_bypass && self.is_admin(actor)) {
            return Ok(());
        }

        let Some(scope) = scope else {
            return Err(AuthorizationFailure::MissingScope);
        };

        let is_buyer = scope.buyer == &actor.id;
        let is_assigned = self.is_distributor(actor) && scope.distributor == Some(&actor.id);
        let is_claimable = self.is_distributor(actor) && scope.distributor.is_none();

        match policy.party {
            Party::Anyone => Ok(()),
            Party::Buyer if is_buyer => Ok(()),
            Party::Buyer => Err(AuthorizationFailure::NotBuyer { actor: actor.id.clone() }),
            Party::AssignedDistributor if is_assigned => Ok(()),
            Party::ClaimingDistributor if is_assigned || is_claimable => Ok(()),
            Party::AssignedDistributor | Party::ClaimingDistributor => {
                Err(AuthorizationFailure::NotAssignedDistributor { actor: actor.id.clone() })
            }
            Party::Participant
                if is_buyer || is_assigned || is_claimable || self.owns_or_assigned(actor, scope) =>
            {
                Ok(())
            }
            Party::Participant => {
                Err(AuthorizationFailure::NotParticipant { actor: actor.id.clone() })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AuthorizationFailure, Operation, PermissionLevel, RequestScope, RoleAuthority,
        OPERATION_POLICIES,
    };
    use crate::domain::actor::{Actor, ActorId, Role};

    fn scope<'a>(buyer: &'a ActorId, distributor: Option<&'a ActorId>) -> RequestScope<'a> {
        RequestScope { buyer, distributor }
    }

    #[test]
    fn hierarchy_is_ascending() {
        let authority = RoleAuthority;
        let ranks: Vec<u8> = Role::ALL.iter().map(|role| authority.grant(*role).rank).collect();
        assert!(ranks.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn admin_and_distributor_groups_match_role_table() {
        let authority = RoleAuthority;
        let admins: Vec<Role> =
            Role::ALL.into_iter().filter(|role| authority.grant(*role).admin).collect();
        let distributors: Vec<Role> =
            Role::ALL.into_iter().filter(|role| authority.grant(*role).distributor).collect();

        assert_eq!(admins, vec![Role::Operator, Role::Developer]);
        assert_eq!(distributors, vec![Role::Distributor, Role::Operator, Role::Developer]);
    }

    #[test]
    fn authorize_compares_rank_against_required_level() {
        let authority = RoleAuthority;
        assert!(!authority.authorize(&Actor::new("g", Role::Guest), PermissionLevel::Member));
        assert!(authority.authorize(&Actor::new("a", Role::Advertiser), PermissionLevel::Member));
        assert!(!authority.authorize(&Actor::new("a", Role::Agency), PermissionLevel::Distributor));
        let distributor = Actor::new("d", Role::Distributor);
        assert!(authority.authorize(&distributor, PermissionLevel::Distributor));
        assert!(!authority.authorize(&distributor, PermissionLevel::Admin));
        assert!(authority.authorize(&Actor::new("o", Role::Operator), PermissionLevel::Admin));
    }

    #[test]
    fn owns_or_assigned_scopes_by_role_group() {
        let authority = RoleAuthority;
        let buyer = ActorId("buyer-1".to_string());
        let dist = ActorId("dist-1".to_string());
        let scope = scope(&buyer, Some(&dist));

        assert!(authority.owns_or_assigned(&Actor::new("buyer-1", Role::Advertiser), &scope));
        assert!(!authority.owns_or_assigned(&Actor::new("buyer-2", Role::Advertiser), &scope));
        assert!(authority.owns_or_assigned(&Actor::new("dist-1", Role::Distributor), &scope));
        assert!(!authority.owns_or_assigned(&Actor::new("dist-2", Role::Distributor), &scope));
        assert!(authority.owns_or_assigned(&Actor::new("ops", Role::Operator), &scope));
    }

    #[test]
    fn every_operation_has_a_policy_row() {
        let operations = [
            Operation::CreateRequest,
            Operation::OpenNegotiation,
            Operation::AcceptRequest,
            Operation::RejectRequest,
            Operation::ReopenRequest,
            Operation::ExpireRequest,
            Operation::PurchaseRequest,
            Operation::ViewRequest,
            Operation::ApproveSlot,
            Operation::RejectSlot,
            Operation::CompleteSlot,
            Operation::CancelSlot,
            Operation::RequestRefund,
            Operation::ProposeRefund,
            Operation::ApproveRefund,
            Operation::RejectRefund,
            Operation::ConfirmRefund,
            Operation::DeclineRefund,
        ];
        for operation in operations {
            assert!(
                OPERATION_POLICIES.iter().any(|policy| policy.operation == operation),
                "missing policy for {operation}"
            );
        }
    }

    #[test]
    fn regular_user_cannot_approve_refunds() {
        let authority = RoleAuthority;
        let buyer = ActorId("buyer-1".to_string());
        let dist = ActorId("dist-1".to_string());

        let failure = authority
            .check(
                &Actor::new("buyer-2", Role::Advertiser),
                Operation::ApproveRefund,
                Some(&scope(&buyer, Some(&dist))),
            )
            .expect_err("regular users never approve refunds");

        assert_eq!(
            failure,
            AuthorizationFailure::InsufficientRole {
                role: Role::Advertiser,
                required: PermissionLevel::Distributor
            }
        );
    }

    #[test]
    fn unassigned_requests_are_claimable_by_any_distributor() {
        let authority = RoleAuthority;
        let buyer = ActorId("buyer-1".to_string());
        let actor = Actor::new("dist-9", Role::Distributor);

        authority
            .check(&actor, Operation::OpenNegotiation, Some(&scope(&buyer, None)))
            .expect("unassigned request is claimable");

        let other = ActorId("dist-1".to_string());
        let failure = authority
            .check(&actor, Operation::OpenNegotiation, Some(&scope(&buyer, Some(&other))))
            .expect_err("assigned to someone else");
        assert!(matches!(failure, AuthorizationFailure::NotAssignedDistributor { .. }));

        let failure = authority
            .check(&actor, Operation::AcceptRequest, Some(&scope(&buyer, None)))
            .expect_err("accept needs an assignment");
        assert!(matches!(failure, AuthorizationFailure::NotAssignedDistributor { .. }));
    }

    #[test]
    fn buyer_operations_reject_assigned_distributor() {
        let authority = RoleAuthority;
        let buyer = ActorId("buyer-1".to_string());
        let dist = ActorId("dist-1".to_string());

        let failure = authority
            .check(
                &Actor::new("dist-1", Role::Distributor),
                Operation::PurchaseRequest,
                Some(&scope(&buyer, Some(&dist))),
            )
            .expect_err("distributor cannot purchase for the buyer");
        assert!(matches!(failure, AuthorizationFailure::NotBuyer { .. }));

        authority
            .check(
                &Actor::new("buyer-1", Role::Advertiser),
                Operation::PurchaseRequest,
                Some(&scope(&buyer, Some(&dist))),
            )
            .expect("buyer may purchase");
    }

    #[test]
    fn admins_bypass_party_scoping() {
        let authority = RoleAuthority;
        let buyer = ActorId("buyer-1".to_string());
        let dist = ActorId("dist-1".to_string());

        let admin_only =
            [Operation::ApproveSlot, Operation::ApproveRefund, Operation::ExpireRequest];
        for operation in admin_only {
            authority
                .check(
                    &Actor::new("dev", Role::Developer),
                    operation,
                    Some(&scope(&buyer, Some(&dist))),
                )
                .expect("developer bypasses scoping");
        }
    }

    #[test]
    fn only_the_buyer_resolves_distributor_proposals() {
        let authority = RoleAuthority;
        let buyer = ActorId("buyer-1".to_string());
        let dist = ActorId("dist-1".to_string());
        let scope = scope(&buyer, Some(&dist));

        for actor in [Actor::new("dev", Role::Developer), Actor::new("dist-1", Role::Distributor)] {
            let failure = authority
                .check(&actor, Operation::ConfirmRefund, Some(&scope))
                .expect_err("proposals are confirmed by the buyer");
            assert!(matches!(failure, AuthorizationFailure::NotBuyer { .. }));
        }

        authority
            .check(&Actor::new("buyer-1", Role::Advertiser), Operation::DeclineRefund, Some(&scope))
            .expect("buyer may decline");
    }

    #[test]
    fn expiry_requires_admin_level() {
        let authority = RoleAuthority;
        let failure = authority
            .check(&Actor::new("dist-1", Role::Distributor), Operation::ExpireRequest, None)
            .expect_err("distributors cannot expire");
        assert!(matches!(failure, AuthorizationFailure::InsufficientRole { .. }));
    }
}
