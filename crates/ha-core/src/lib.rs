//! Core types shared by the rules engine and the hub boundary
//!
//! [`EntityId`], [`EntityState`], [`DynValue`] payloads, [`HubEvent`]s as
//! delivered by the hub's event stream, and the [`ServiceCall`]s sent back.

mod context;
pub mod domains;
mod dyn_value;
mod entity_id;
mod event;
mod service_call;
mod state;

pub use context::Context;
pub use dyn_value::DynValue;
pub use entity_id::{EntityId, EntityIdError};
pub use event::{CustomEvent, EventType, HubEvent, StateChange, CALL_SERVICE, STATE_CHANGED};
pub use service_call::{ServiceCall, ATTR_ENTITY_ID};
pub use state::{Attributes, EntityState};
