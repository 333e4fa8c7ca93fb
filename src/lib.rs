//! ScheduleTime: collect everyone's free hours for an event and find the
//! times that suit the most people.
//!
//! The interactive grid (`gesture`, `selection`, `grid`, `date_picker`) is
//! host-agnostic: it consumes pointer input and returns commands for the
//! host to run. Storage, change feeds, push delivery and the web surface
//! sit around it.

pub mod aggregate;
pub mod commands;
pub mod config;
pub mod date_picker;
pub mod error;
pub mod feed;
pub mod gesture;
pub mod grid;
pub mod models;
pub mod push;
pub mod selection;
pub mod slot;
pub mod store;
pub mod submit;
pub mod sync;
pub mod web;
