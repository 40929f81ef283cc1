//! Chat stream wire protocol: the newline-delimited JSON events pushed to a
//! client over one long-lived `/chat/stream` response.
//!
//! This crate defines the wire shape of a single event and nothing else. It
//! does not depend on weft; the serve crate maps executor events into
//! [`TransportEvent`] and calls [`to_json_line`].

pub mod event;

pub use event::{to_json_line, TransportEvent};
