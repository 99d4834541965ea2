//! ForgeIO Edge Gateway: polls PLCs over multiple protocols, buffers
//! readings locally, and keeps them synchronized with a cloud portal.
//!
//! `main.rs` wires these modules together behind [`supervisor::Supervisor`];
//! `tests/` and `demos/` depend on this crate the way any library consumer
//! would.

pub mod config;
pub mod config_sync;
pub mod diagnostics;
pub mod drivers;
pub mod error;
pub mod identity;
pub mod logging;
pub mod polling;
pub mod portal;
pub mod secrets;
pub mod store;
pub mod supervisor;
pub mod tags;
pub mod uploader;
pub mod util;
