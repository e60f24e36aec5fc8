//! The admin HTTP surface (spec §4.5/§6): session/mock/history CRUD plus
//! Verify. [`codec`] handles JSON/YAML negotiation; [`handlers`] holds
//! the transport-free operations; [`crate::server`] wires both into
//! hyper routes.

pub mod codec;
pub mod handlers;
