//! `HaatChat` buyer/seller messaging core for a livestock marketplace.

pub mod app;
pub mod chat;
pub mod config;
pub mod inbox;
pub mod presence;
pub mod transport;
