//! Transaction aggregate: one charging session bound to a connector.

pub mod model;

pub use model::Transaction;
