use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::EntityRef;
use crate::errors::WorkflowError;
use crate::flows::states::{FlowAction, FlowContext, FlowLabel, FlowType, TransitionOutcome};

/// One row of a transition table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition<S: 'static, E: 'static> {
    pub from: S,
    pub event: E,
    pub to: S,
    pub actions: &'static [FlowAction],
}

pub trait FlowDefinition {
    type State: FlowLabel;
    type Event: FlowLabel;

    fn flow_type(&self) -> FlowType;
    fn initial_state(&self) -> Self::State;
    fn transitions(&self) -> &'static [Transition<Self::State, Self::Event>];

    /// States from which `event` is legal.
    fn accepted_states(&self, event: Self::Event) -> Vec<Self::State> {
        let mut states: Vec<Self::State> = Vec::new();
        for row in self.transitions().iter().filter(|row| row.event == event) {
            if !states.contains(&row.from) {
                states.push(row.from);
            }
        }
        states
    }

    fn transition(
        &self,
        current: Self::State,
        event: Self::Event,
        context: &FlowContext,
    ) -> Result<TransitionOutcome<Self::State, Self::Event>, FlowTransitionError> {
        let Some(row) =
            self.transitions().iter().find(|row| row.from == current && row.event == event)
        else {
            return Err(FlowTransitionError::InvalidTransition {
                flow: self.flow_type(),
                state: current.label().to_string(),
                event: event.label().to_string(),
                accepted: self
                    .accepted_states(event)
                    .iter()
                    .map(|state| state.label().to_string())
                    .collect(),
            });
        };

        if !context.missing_required_fields.is_empty() {
            return Err(FlowTransitionError::MissingRequiredFields {
                flow: self.flow_type(),
                state: current.label().to_string(),
                missing_fields: context.missing_required_fields.clone(),
            });
        }

        Ok(TransitionOutcome { from: row.from, to: row.to, event, actions: row.actions.to_vec() })
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn flow_type(&self) -> FlowType {
        self.flow.flow_type()
    }

    pub fn initial_state(&self) -> F::State {
        self.flow.initial_state()
    }

    pub fn accepted_states(&self, event: F::Event) -> Vec<F::State> {
        self.flow.accepted_states(event)
    }

    pub fn apply(
        &self,
        current: F::State,
        event: F::Event,
        context: &FlowContext,
    ) -> Result<TransitionOutcome<F::State, F::Event>, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: F::State,
        event: F::Event,
        context: &FlowContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome<F::State, F::Event>, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "flow.transition_applied",
                        AuditCategory::Flow,
                        AuditOutcome::Success,
                    )
                    .with_metadata("flow", self.flow_type().as_str())
                    .with_metadata("from", outcome.from.label())
                    .with_metadata("to", outcome.to.label())
                    .with_metadata("event", outcome.event.label()),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "flow.transition_rejected",
                        AuditCategory::Flow,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("flow", self.flow_type().as_str())
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("missing required fields before leaving {flow:?} state `{state}`: {missing_fields:?}")]
    MissingRequiredFields { flow: FlowType, state: String, missing_fields: Vec<String> },
    #[error("invalid {flow:?} transition from `{state}` using event `{event}`")]
    InvalidTransition { flow: FlowType, state: String, event: String, accepted: Vec<String> },
}

impl FlowTransitionError {
    pub fn for_entity(self, entity: EntityRef) -> WorkflowError {
        match self {
            Self::MissingRequiredFields { missing_fields, state, .. } => WorkflowError::Validation {
                entity: Some(entity),
                field: missing_fields.join(","),
                message: format!("required before leaving `{state}`"),
            },
            Self::InvalidTransition { state, accepted, .. } => {
                WorkflowError::InvalidTransition { entity, current: state, required: accepted }
            }
        }
    }
}
