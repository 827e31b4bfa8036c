pub mod client;
pub mod enums;
pub mod order;
pub mod order_item;
pub mod plan;
pub mod plan_assignment;
pub mod product;
pub mod sequence;
pub mod user;

pub use enums::{
    CriteriaOperator, DeliveryMethod, Labelled, OrderSource, OrderStatus, PaymentMethod,
    PriceLevel,
};
