//! `streamledger-events`: message dispatch core and projection engine.

pub mod aggregate;
pub mod changes;
pub mod dispatch;
pub mod message;
pub mod metadata;
pub mod projection;
pub mod recorded;
pub mod runner;

pub use aggregate::{Aggregate, Root};
pub use changes::{ChangeTracker, Changeset};
pub use dispatch::{DispatchError, EventRouter, MessageRouter};
pub use message::{AsAny, Event, Message};
pub use metadata::{AnyCommand, ExecutionContext, Metadata, MetadataProvider, SystemMetadataProvider};
pub use projection::{Projection, ProjectionError, ReadModel};
pub use recorded::RecordedEvent;
pub use runner::ProjectionRunner;
