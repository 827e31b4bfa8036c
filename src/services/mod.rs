//! Domain services. Free functions taking a `ConnectionTrait` run inside a
//! caller's transaction; the `*Service` structs own their transactions.

pub mod analytics;
pub mod hierarchy;
pub mod order_query;
pub mod orders;
pub mod plans;
pub mod pricing;
pub mod progress;
