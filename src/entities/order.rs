use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// An order as captured at checkout. Money fields and items are a snapshot
/// and never change afterwards; `status`, `courier_id` and the lifecycle
/// timestamps are the mutable part, guarded by `version`.
#[derive(
    Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, Validate, utoipa::ToSchema,
)]
#[schema(as = Order)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[validate(length(
        min = 1,
        max = 50,
        message = "Order number must be between 1 and 50 characters"
    ))]
    pub order_number: String,

    pub customer_id: Uuid,
    pub merchant_id: Uuid,
    #[sea_orm(nullable)]
    pub courier_id: Option<Uuid>,

    pub status: OrderStatus,
    pub delivery_type: DeliveryType,

    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub delivery_fee: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub service_fee: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub tax: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total: Decimal,

    pub payment_method: String,
    pub payment_status: String,

    pub delivery_street: String,
    pub delivery_city: String,
    pub delivery_lat: f64,
    pub delivery_lng: f64,
    pub contact_phone: String,
    #[sea_orm(nullable)]
    pub delivery_instructions: Option<String>,
    #[sea_orm(nullable)]
    pub cancellation_reason: Option<String>,

    pub version: i32,

    pub placed_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub ready_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub assigned_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub picked_up_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub delivered_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(has_many = "super::order_status_history::Entity")]
    StatusHistory,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::order_status_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StatusHistory.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Order lifecycle status. `Delivered` and `Cancelled` are terminal.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
    utoipa::ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "preparing")]
    Preparing,
    #[sea_orm(string_value = "ready")]
    Ready,
    #[sea_orm(string_value = "assigned")]
    Assigned,
    #[sea_orm(string_value = "picked_up")]
    PickedUp,
    #[sea_orm(string_value = "in_transit")]
    InTransit,
    #[sea_orm(string_value = "delivered")]
    #[serde(alias = "completed")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    #[serde(alias = "canceled")]
    Cancelled,
    #[sea_orm(string_value = "issue")]
    Issue,
}

impl OrderStatus {
    /// Parses API input, accepting the `completed` and `canceled` synonyms
    /// that older clients still send.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "preparing" => Some(Self::Preparing),
            "ready" => Some(Self::Ready),
            "assigned" => Some(Self::Assigned),
            "picked_up" => Some(Self::PickedUp),
            "in_transit" => Some(Self::InTransit),
            "delivered" | "completed" => Some(Self::Delivered),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "issue" => Some(Self::Issue),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }
}

/// How the order reaches the customer: a courier delivery or a customer
/// pickup at the merchant (no courier involved).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
    utoipa::ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeliveryType {
    #[sea_orm(string_value = "courier")]
    Courier,
    #[sea_orm(string_value = "pickup")]
    Pickup,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_canonical_and_synonym_spellings() {
        assert_eq!(OrderStatus::parse("picked_up"), Some(OrderStatus::PickedUp));
        assert_eq!(OrderStatus::parse("Delivered"), Some(OrderStatus::Delivered));
        assert_eq!(OrderStatus::parse("completed"), Some(OrderStatus::Delivered));
        assert_eq!(OrderStatus::parse("cancelled"), Some(OrderStatus::Cancelled));
        assert_eq!(OrderStatus::parse("canceled"), Some(OrderStatus::Cancelled));
        assert_eq!(OrderStatus::parse("on_hold"), None);
    }

    #[test]
    fn json_input_accepts_terminal_synonyms() {
        let completed: OrderStatus = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(completed, OrderStatus::Delivered);
        let canceled: OrderStatus = serde_json::from_str("\"canceled\"").unwrap();
        assert_eq!(canceled, OrderStatus::Cancelled);
        // Canonical spelling on the way out.
        assert_eq!(
            serde_json::to_string(&OrderStatus::Delivered).unwrap(),
            "\"delivered\""
        );
    }

    #[test]
    fn display_matches_stored_string_values() {
        assert_eq!(OrderStatus::InTransit.to_string(), "in_transit");
        assert_eq!(OrderStatus::PickedUp.to_string(), "picked_up");
        assert_eq!(DeliveryType::Pickup.to_string(), "pickup");
    }

    #[test]
    fn only_delivered_and_cancelled_are_terminal() {
        assert!(OrderStatus::Delivered.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        for status in [
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::Preparing,
            OrderStatus::Ready,
            OrderStatus::Assigned,
            OrderStatus::PickedUp,
            OrderStatus::InTransit,
            OrderStatus::Issue,
        ] {
            assert!(!status.is_terminal(), "{status} must not be terminal");
        }
    }
}
