//! Handshake progress events

pub mod event_stream;

pub use event_stream::{EventFilter, EventStream, FilteredEventStream, HandshakeEvent};
