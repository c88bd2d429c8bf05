use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        cart, cart_item, order, order_item, order_status_history, ActorRole, DeliveryType,
        OrderStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    metrics,
    services::{
        catalog::{Catalog, ListingInfo, MerchantDirectory},
        geo::GeoPoint,
        pricing::PricingCalculator,
    },
};

const MIN_PHONE_DIGITS: usize = 10;

static PHONE_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9().\-\s]+$").expect("phone pattern compiles"));

/// Converts the customer's cart into an order, or fails leaving cart and
/// order store untouched.
///
/// Every line is re-validated and re-priced from the live catalog; the
/// cart's snapshots are only hints. Order insert and cart clear commit as
/// one transaction, so no partial order is ever visible and a failed
/// checkout leaves the cart intact.
///
/// Checkout is never routed through the retry helper. A timeout here must
/// surface to the caller, who re-submits explicitly.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    pricing: PricingCalculator,
    catalog: Arc<dyn Catalog>,
    merchants: Arc<dyn MerchantDirectory>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        pricing: PricingCalculator,
        catalog: Arc<dyn Catalog>,
        merchants: Arc<dyn MerchantDirectory>,
    ) -> Self {
        Self {
            db,
            event_sender,
            pricing,
            catalog,
            merchants,
        }
    }

    /// Places an order from the customer's current cart.
    ///
    /// # Errors
    ///
    /// * `ServiceError::EmptyCart` - Nothing to check out
    /// * `ServiceError::ItemUnavailable` - A line vanished from the catalog,
    ///   is marked unavailable, or moved to another merchant
    /// * `ServiceError::InvalidDeliveryInfo` - Malformed address, coordinates
    ///   or phone, rejected before any write
    /// * `ServiceError::MinimumOrderNotMet` - Re-priced subtotal is below the
    ///   merchant's floor
    #[instrument(skip(self, input), fields(customer_id = %customer_id))]
    pub async fn checkout(
        &self,
        customer_id: Uuid,
        input: CheckoutInput,
    ) -> Result<order::Model, ServiceError> {
        let cart_row = cart::Entity::find_by_id(customer_id).one(&*self.db).await?;
        let items = cart_item::Entity::find()
            .filter(cart_item::Column::CartCustomerId.eq(customer_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        if items.is_empty() {
            return Err(ServiceError::EmptyCart);
        }
        let merchant_id = cart_row.and_then(|c| c.merchant_id).ok_or_else(|| {
            ServiceError::InternalError("Cart has items but no merchant binding".to_string())
        })?;

        let mut lines: Vec<PricedLine> = Vec::with_capacity(items.len());
        for item in &items {
            let listing = self.catalog.listing(item.listing_id).await?.ok_or_else(|| {
                ServiceError::ItemUnavailable(format!(
                    "Listing {} is no longer offered",
                    item.listing_id
                ))
            })?;
            if !listing.is_available {
                return Err(ServiceError::ItemUnavailable(listing.name));
            }
            if listing.merchant_id != merchant_id {
                return Err(ServiceError::ItemUnavailable(format!(
                    "{} belongs to another merchant",
                    listing.name
                )));
            }
            lines.push(PricedLine {
                listing,
                quantity: item.quantity,
            });
        }

        validate_delivery_info(&input)?;
        if input.payment_method.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Payment method must not be empty".to_string(),
            ));
        }

        let merchant = self.merchants.merchant(merchant_id).await?.ok_or_else(|| {
            ServiceError::NotFound(format!("Merchant {} not found", merchant_id))
        })?;

        let subtotal: Decimal = lines
            .iter()
            .map(|line| line.listing.price * Decimal::from(line.quantity))
            .sum();
        if subtotal < merchant.minimum_order {
            return Err(ServiceError::MinimumOrderNotMet {
                minimum: merchant.minimum_order,
                subtotal,
            });
        }
        let quote = self.pricing.quote(subtotal, &merchant, input.delivery_type);

        let txn = self.db.begin().await?;

        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(format!("ORD-{}", order_id.to_string()[..8].to_uppercase())),
            customer_id: Set(customer_id),
            merchant_id: Set(merchant_id),
            courier_id: Set(None),
            status: Set(OrderStatus::Pending),
            delivery_type: Set(input.delivery_type),
            subtotal: Set(quote.subtotal),
            delivery_fee: Set(quote.delivery_fee),
            service_fee: Set(quote.service_fee),
            tax: Set(quote.tax),
            total: Set(quote.total),
            payment_method: Set(input.payment_method.clone()),
            payment_status: Set("pending".to_string()),
            delivery_street: Set(input.street.clone()),
            delivery_city: Set(input.city.clone()),
            delivery_lat: Set(input.lat),
            delivery_lng: Set(input.lng),
            contact_phone: Set(input.contact_phone.clone()),
            delivery_instructions: Set(input.delivery_instructions.clone()),
            cancellation_reason: Set(None),
            version: Set(0),
            placed_at: Set(now),
            confirmed_at: Set(None),
            ready_at: Set(None),
            assigned_at: Set(None),
            picked_up_at: Set(None),
            delivered_at: Set(None),
            created_at: Set(now),
            updated_at: Set(None),
        };
        let order = order.insert(&txn).await?;

        for line in &lines {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                listing_id: Set(line.listing.id),
                name: Set(line.listing.name.clone()),
                unit_price: Set(line.listing.price),
                quantity: Set(line.quantity),
                total_price: Set(line.listing.price * Decimal::from(line.quantity)),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        order_status_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            status: Set(OrderStatus::Pending),
            actor_id: Set(customer_id),
            actor_role: Set(ActorRole::Customer),
            note: Set(None),
            recorded_at: Set(now),
        }
        .insert(&txn)
        .await?;

        cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartCustomerId.eq(customer_id))
            .exec(&txn)
            .await?;
        if let Some(cart_row) = cart::Entity::find_by_id(customer_id).one(&txn).await? {
            let mut active: cart::ActiveModel = cart_row.into();
            active.merchant_id = Set(None);
            active.updated_at = Set(now);
            active.update(&txn).await?;
        }

        txn.commit().await?;

        metrics::ORDERS_PLACED.inc();
        self.event_sender
            .send_or_log(Event::CheckoutCompleted {
                customer_id,
                order_id,
            })
            .await;

        info!(
            "Checkout completed: order {} ({}) placed by customer {} at merchant {}",
            order_id, order.order_number, customer_id, merchant_id
        );
        Ok(order)
    }
}

struct PricedLine {
    listing: ListingInfo,
    quantity: i32,
}

fn validate_delivery_info(input: &CheckoutInput) -> Result<(), ServiceError> {
    if input.street.trim().is_empty() {
        return Err(ServiceError::InvalidDeliveryInfo(
            "Street must not be empty".to_string(),
        ));
    }
    if input.city.trim().is_empty() {
        return Err(ServiceError::InvalidDeliveryInfo(
            "City must not be empty".to_string(),
        ));
    }
    if !GeoPoint::new(input.lat, input.lng).is_valid() {
        return Err(ServiceError::InvalidDeliveryInfo(
            "Coordinates must lie within [-90, 90] x [-180, 180]".to_string(),
        ));
    }
    if !PHONE_SHAPE.is_match(input.contact_phone.trim()) {
        return Err(ServiceError::InvalidDeliveryInfo(
            "Phone may only contain digits, spaces and +-().".to_string(),
        ));
    }
    let digits = input
        .contact_phone
        .chars()
        .filter(|c| c.is_ascii_digit())
        .count();
    if digits < MIN_PHONE_DIGITS {
        return Err(ServiceError::InvalidDeliveryInfo(format!(
            "Phone must contain at least {} digits",
            MIN_PHONE_DIGITS
        )));
    }
    Ok(())
}

/// Delivery and payment details for placing an order.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CheckoutInput {
    #[serde(default = "default_delivery_type")]
    pub delivery_type: DeliveryType,
    pub street: String,
    pub city: String,
    pub lat: f64,
    pub lng: f64,
    pub contact_phone: String,
    pub delivery_instructions: Option<String>,
    #[validate(length(min = 1, message = "Payment method must not be empty"))]
    pub payment_method: String,
}

fn default_delivery_type() -> DeliveryType {
    DeliveryType::Courier
}
