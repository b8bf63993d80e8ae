//! Event-stream framing: typed records over line-based text framing.
//!
//! Records are separated by a blank line (`\n\n`); each line is
//! `field: value` with the recognized fields `event`, `data`, `id` and
//! `retry`. The [`decoder`] side reassembles records from arbitrarily
//! chunked text; [`Event::to_wire`] produces the same framing for
//! streaming handlers.

mod decoder;
mod event;

pub use decoder::{EventStream, EventStreamDecoder};
pub use event::Event;
