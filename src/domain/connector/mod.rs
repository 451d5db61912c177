//! Connector aggregate: one outlet of a charge point.

pub mod model;

pub use model::{Availability, Connector, ConnectorStatus, StatusChangeOutcome};
