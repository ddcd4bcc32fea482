//! Change notification primitives.
//!
//! - [`event_emitter`]: typed listener list ([`EventEmitter<T>`]).
//! - [`event`]: [`ChangeEvent`] and the shared [`ChangeFeed`].

pub mod event;
pub mod event_emitter;

pub use event::{ChangeEvent, ChangeFeed};
pub use event_emitter::{EventEmitter, ListenerId};
