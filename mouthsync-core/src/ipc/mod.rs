//! Event types published to consumers outside the engine task.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! forward them over whatever transport drives the face.

pub mod events;
