//! Core runtime for sitekit.
//!
//! This crate provides the three coordination primitives shared by every
//! page of the site — the reactive state store, the on-demand module
//! loader, and the namespaced event bus — plus the storage layer and the
//! logging subsystem they report through. Everything else on the site is
//! UI glue that consumes these primitives.

pub mod bus;
pub mod error;
pub mod events;
pub mod loader;
pub mod logging;
pub mod module;
pub mod registry;
pub mod state;
pub mod storage;
