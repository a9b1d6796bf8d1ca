//! Domain services used by the websocket route.
//!
//! ARCHITECTURE
//! ============
//! Service modules own business logic, room state and store access so the
//! route handler can stay focused on protocol translation and auth plumbing.
//! Room fan-out happens inside the services, under the room lock, which is
//! what keeps a room's events in arrival order for every recipient.

pub mod auth;
pub mod board;
pub mod broadcast;
pub mod ephemeral;
pub mod message;
pub mod presence;
pub mod registry;
