//! Non-domain data attached to every recorded event.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use streamledger_core::{Id, Ref};

/// Marker target for references to commands, whatever their payload type.
#[derive(Debug)]
pub enum AnyCommand {}

/// Where an append is happening: inside a command, or outside of any.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub command_id: Option<Id>,
    pub parent_command: Option<Ref<AnyCommand>>,
}

impl ExecutionContext {
    /// Appends not caused by any command (migrations, tests, imports).
    pub fn system() -> Self {
        Self::default()
    }

    pub fn for_command(command_id: Id) -> Self {
        Self {
            command_id: Some(command_id),
            parent_command: None,
        }
    }

    pub fn with_parent(mut self, parent: Ref<AnyCommand>) -> Self {
        self.parent_command = Some(parent);
        self
    }
}

/// Metadata stored alongside each event of one appended changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub timestamp: DateTime<Utc>,
    pub command_id: Option<Id>,
    pub parent_command: Option<Ref<AnyCommand>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, JsonValue>,
}

impl Metadata {
    pub fn new(timestamp: DateTime<Utc>, context: &ExecutionContext) -> Self {
        Self {
            timestamp,
            command_id: context.command_id,
            parent_command: context.parent_command,
            headers: BTreeMap::new(),
        }
    }

    /// Metadata stamped with the current wall clock.
    pub fn now(context: &ExecutionContext) -> Self {
        Self::new(Utc::now(), context)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&JsonValue> {
        self.headers.get(key)
    }
}

/// Supplies the metadata for one persisted changeset.
pub trait MetadataProvider: Send + Sync {
    fn metadata(&self, context: &ExecutionContext) -> Metadata;
}

impl<P> MetadataProvider for Arc<P>
where
    P: MetadataProvider + ?Sized,
{
    fn metadata(&self, context: &ExecutionContext) -> Metadata {
        (**self).metadata(context)
    }
}

/// Wall-clock timestamp plus the command identifiers of the context.
#[derive(Debug, Clone, Default)]
pub struct SystemMetadataProvider {
    headers: BTreeMap<String, JsonValue>,
}

impl SystemMetadataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a static header (e.g. the producing service) to every changeset.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

impl MetadataProvider for SystemMetadataProvider {
    fn metadata(&self, context: &ExecutionContext) -> Metadata {
        let mut metadata = Metadata::now(context);
        metadata.headers.extend(self.headers.clone());
        metadata
    }
}
