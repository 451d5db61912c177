//! Cross-cutting utilities shared by every layer: error taxonomy,
//! shutdown coordination, and OCPP-J wire framing.

pub mod errors;
pub mod ocpp_frame;
pub mod shutdown;
