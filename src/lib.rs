//! An in-process HTTP mock server: a declarative matcher engine, a
//! quota-aware dispatcher and a session-scoped history with
//! verification, built for test harnesses and CI pipelines.

pub mod admin;
pub mod dispatcher;
pub mod error;
pub mod matchers;
pub mod model;
pub mod server;
pub mod store;
pub mod template;
pub mod wire;
