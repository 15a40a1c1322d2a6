//! Serialisable events for whatever control surface hosts the engine.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! forward them as JSON without its own mirror types.

pub mod events;
