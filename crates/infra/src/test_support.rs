//! Shared fixtures for infra tests.

use streamledger_core::{DomainError, Id};
use streamledger_events::{Aggregate, Event, EventRouter, Message, MessageRouter, Root};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Account {
    pub name: String,
    pub code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Created {
    pub name: String,
}

impl Created {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string() }
    }
}

impl Message for Created {
    fn message_type(&self) -> &'static str {
        "account.created"
    }
}
impl Event for Created {}

#[derive(Debug, Clone)]
pub struct CodeAssigned {
    pub code: String,
}

impl CodeAssigned {
    pub fn new(code: &str) -> Self {
        Self { code: code.to_string() }
    }
}

impl Message for CodeAssigned {
    fn message_type(&self) -> &'static str {
        "account.code_assigned"
    }
}
impl Event for CodeAssigned {}

/// Request handled by the account root itself.
#[derive(Debug, Clone)]
pub struct AssignCode(pub String);

impl Message for AssignCode {
    fn message_type(&self) -> &'static str {
        "account.assign_code"
    }
}

impl Aggregate for Account {
    const AGGREGATE_TYPE: &'static str = "account";

    fn initial(_id: Id) -> Self {
        Self::default()
    }

    fn routes(router: &mut EventRouter<Self>) {
        router
            .on(|a: &mut Account, e: &Created| a.name = e.name.clone())
            .on(|a: &mut Account, e: &CodeAssigned| a.code = Some(e.code.clone()));
    }

    fn messages(router: &mut MessageRouter<Root<Self>>) {
        router.on(|root: &mut Root<Account>, m: &AssignCode| -> Result<(), DomainError> {
            if m.0.len() != 4 || !m.0.chars().all(|c| c.is_ascii_digit()) {
                return Err(DomainError::validation("code must have 4 digits"));
            }
            root.apply_change(CodeAssigned::new(&m.0))
                .map_err(|e| DomainError::invariant(e.to_string()))
        });
    }
}
