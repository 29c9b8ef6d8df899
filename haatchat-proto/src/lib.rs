//! Shared data model and wire format for `HaatChat` conversations.

pub mod codec;
pub mod message;
