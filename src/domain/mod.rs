//! Domain layer — core entities shared by the charge point runtime, the
//! scenario executor, and the supervisor.

pub mod charge_point;
pub mod charging_profile;
pub mod connector;
pub mod events;
pub mod transaction;

pub use charge_point::{ChargePoint, ChargePointStatus};
pub use charging_profile::ActiveChargingProfile;
pub use connector::{Availability, Connector, ConnectorStatus, StatusChangeOutcome};
pub use events::{Event, EventMessage};
pub use transaction::Transaction;
