use crate::errors::ServiceError;
use sea_orm::entity::prelude::*;
use sea_orm::Iterable;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Stored string enums that also carry a human label.
///
/// Labels are what users type into free-text search, so `matching_label`
/// is how search terms are turned back into stored values.
pub trait Labelled: ActiveEnum<Value = String> + Iterable + Sized {
    /// Field name used in validation messages
    const FIELD: &'static str;

    fn label(&self) -> &'static str;

    /// Parse a stored value, rejecting anything outside the fixed set
    fn parse(raw: &str) -> Result<Self, ServiceError> {
        Self::try_from_value(&raw.trim().to_string()).map_err(|_| {
            ServiceError::ValidationError(format!("{}: unknown value '{}'", Self::FIELD, raw))
        })
    }

    /// Values whose label or stored value contains `needle` (case-insensitive)
    fn matching_label(needle: &str) -> Vec<Self> {
        let needle = needle.to_lowercase();
        Self::iter()
            .filter(|v| {
                v.label().to_lowercase().contains(&needle) || v.to_value().contains(&needle)
            })
            .collect()
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "new")]
    New,
    #[sea_orm(string_value = "new_paid")]
    NewPaid,
    #[sea_orm(string_value = "reserve")]
    Reserve,
    #[sea_orm(string_value = "transfer")]
    Transfer,
    #[sea_orm(string_value = "delivery")]
    Delivery,
    #[sea_orm(string_value = "callback")]
    Callback,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "refund")]
    Refund,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "cancel_no_answer")]
    CancelNoAnswer,
    #[sea_orm(string_value = "cancel_not_suitable_year")]
    CancelNotSuitableYear,
    #[sea_orm(string_value = "cancel_wrong_order")]
    CancelWrongOrder,
    #[sea_orm(string_value = "cancel_found_other")]
    CancelFoundOther,
    #[sea_orm(string_value = "cancel_delivery_terms")]
    CancelDeliveryTerms,
    #[sea_orm(string_value = "cancel_no_quantity")]
    CancelNoQuantity,
    #[sea_orm(string_value = "cancel_incomplete")]
    CancelIncomplete,
}

impl Default for OrderStatus {
    fn default() -> Self {
        OrderStatus::New
    }
}

impl OrderStatus {
    /// The generic `cancelled` status plus every specific cancel reason
    pub const CANCELLED_FAMILY: [OrderStatus; 8] = [
        OrderStatus::Cancelled,
        OrderStatus::CancelNoAnswer,
        OrderStatus::CancelNotSuitableYear,
        OrderStatus::CancelWrongOrder,
        OrderStatus::CancelFoundOther,
        OrderStatus::CancelDeliveryTerms,
        OrderStatus::CancelNoQuantity,
        OrderStatus::CancelIncomplete,
    ];

    pub fn is_cancelled(&self) -> bool {
        Self::CANCELLED_FAMILY.contains(self)
    }

    /// Expand a comma separated status filter. The `cancelled` token
    /// stands for the whole cancelled family.
    pub fn expand_filter(raw: &str) -> Result<Vec<OrderStatus>, ServiceError> {
        let mut statuses = Vec::new();
        for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let expanded: Vec<OrderStatus> = if token == "cancelled" {
                Self::CANCELLED_FAMILY.to_vec()
            } else {
                vec![Self::parse(token)?]
            };
            for status in expanded {
                if !statuses.contains(&status) {
                    statuses.push(status);
                }
            }
        }
        Ok(statuses)
    }
}

impl Labelled for OrderStatus {
    const FIELD: &'static str = "status";

    fn label(&self) -> &'static str {
        match self {
            OrderStatus::New => "New",
            OrderStatus::NewPaid => "New (paid)",
            OrderStatus::Reserve => "Reserved",
            OrderStatus::Transfer => "Transfer",
            OrderStatus::Delivery => "Delivery",
            OrderStatus::Callback => "Call back",
            OrderStatus::Completed => "Completed",
            OrderStatus::Refund => "Refund",
            OrderStatus::Cancelled => "Cancelled (reason required)",
            OrderStatus::CancelNoAnswer => "Cancelled: no answer",
            OrderStatus::CancelNotSuitableYear => "Cancelled: production year not suitable",
            OrderStatus::CancelWrongOrder => "Cancelled: ordered by mistake",
            OrderStatus::CancelFoundOther => "Cancelled: found elsewhere",
            OrderStatus::CancelDeliveryTerms => "Cancelled: delivery terms",
            OrderStatus::CancelNoQuantity => "Cancelled: not enough stock",
            OrderStatus::CancelIncomplete => "Cancelled: incomplete set",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum OrderSource {
    #[sea_orm(string_value = "callcentr")]
    Callcentr,
    #[sea_orm(string_value = "2gis")]
    #[serde(rename = "2gis")]
    TwoGis,
    #[sea_orm(string_value = "email")]
    Email,
    #[sea_orm(string_value = "instagram")]
    Instagram,
    #[sea_orm(string_value = "kaspi")]
    Kaspi,
    #[sea_orm(string_value = "whatsapp")]
    Whatsapp,
    #[sea_orm(string_value = "website")]
    Website,
}

impl Default for OrderSource {
    fn default() -> Self {
        OrderSource::Website
    }
}

impl Labelled for OrderSource {
    const FIELD: &'static str = "source";

    fn label(&self) -> &'static str {
        match self {
            OrderSource::Callcentr => "Call center",
            OrderSource::TwoGis => "2GIS WhatsApp",
            OrderSource::Email => "E-mail",
            OrderSource::Instagram => "Instagram",
            OrderSource::Kaspi => "Kaspi",
            OrderSource::Whatsapp => "WhatsApp",
            OrderSource::Website => "Website",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "airba")]
    Airba,
    #[sea_orm(string_value = "halyk")]
    Halyk,
    #[sea_orm(string_value = "kaspi")]
    Kaspi,
    #[sea_orm(string_value = "woopay")]
    Woopay,
    #[sea_orm(string_value = "bcc")]
    Bcc,
    #[sea_orm(string_value = "cassa")]
    Cassa,
    #[sea_orm(string_value = "account")]
    Account,
    #[sea_orm(string_value = "installment")]
    Installment,
    #[sea_orm(string_value = "site")]
    Site,
    #[sea_orm(string_value = "card")]
    Card,
    #[sea_orm(string_value = "transfer")]
    Transfer,
    #[sea_orm(string_value = "cash")]
    Cash,
}

impl Default for PaymentMethod {
    fn default() -> Self {
        PaymentMethod::Cash
    }
}

impl Labelled for PaymentMethod {
    const FIELD: &'static str = "payment_method";

    fn label(&self) -> &'static str {
        match self {
            PaymentMethod::Airba => "Airba Pay",
            PaymentMethod::Halyk => "Halyk",
            PaymentMethod::Kaspi => "Kaspi",
            PaymentMethod::Woopay => "Wooppay",
            PaymentMethod::Bcc => "BCC",
            PaymentMethod::Cassa => "At the till",
            PaymentMethod::Account => "By invoice",
            PaymentMethod::Installment => "Installments (website)",
            PaymentMethod::Site => "Website",
            PaymentMethod::Card => "Card",
            PaymentMethod::Transfer => "Bank transfer",
            PaymentMethod::Cash => "Cash",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    #[sea_orm(string_value = "pickup")]
    Pickup,
    #[sea_orm(string_value = "delivery")]
    Delivery,
    #[sea_orm(string_value = "courier")]
    Courier,
}

impl Default for DeliveryMethod {
    fn default() -> Self {
        DeliveryMethod::Pickup
    }
}

impl Labelled for DeliveryMethod {
    const FIELD: &'static str = "delivery_method";

    fn label(&self) -> &'static str {
        match self {
            DeliveryMethod::Pickup => "Pickup",
            DeliveryMethod::Delivery => "Delivery",
            DeliveryMethod::Courier => "Courier",
        }
    }
}

/// Which catalog price an order snapshots for its items
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum PriceLevel {
    #[sea_orm(string_value = "wholesale")]
    Wholesale,
    #[sea_orm(string_value = "promotional")]
    Promotional,
    #[sea_orm(string_value = "retail")]
    Retail,
}

impl Default for PriceLevel {
    fn default() -> Self {
        PriceLevel::Retail
    }
}

impl Labelled for PriceLevel {
    const FIELD: &'static str = "price_level";

    fn label(&self) -> &'static str {
        match self {
            PriceLevel::Wholesale => "Wholesale",
            PriceLevel::Promotional => "Promotional",
            PriceLevel::Retail => "Retail",
        }
    }
}

/// How count and sum targets combine into "achieved"
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(10))")]
#[serde(rename_all = "snake_case")]
pub enum CriteriaOperator {
    #[sea_orm(string_value = "both")]
    Both,
    #[sea_orm(string_value = "either")]
    Either,
}

impl Default for CriteriaOperator {
    fn default() -> Self {
        CriteriaOperator::Both
    }
}

impl Labelled for CriteriaOperator {
    const FIELD: &'static str = "criteria_operator";

    fn label(&self) -> &'static str {
        match self {
            CriteriaOperator::Both => "Both targets",
            CriteriaOperator::Either => "Either target",
        }
    }
}
