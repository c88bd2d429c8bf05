use crate::{
    entities::{cart, cart_item},
    errors::ServiceError,
    events::{Event, EventSender},
    services::catalog::Catalog,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// Cart service for the single active cart each customer owns.
///
/// Carts are keyed by customer id and scoped to one merchant at a time:
/// - Adding a listing from another merchant replaces the whole cart
///   (last writer wins).
/// - Line prices are snapshots for display only; checkout re-prices every
///   line from the live catalog.
/// - Carts are never checked out directly, they only feed checkout.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    catalog: Arc<dyn Catalog>,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        catalog: Arc<dyn Catalog>,
    ) -> Self {
        Self {
            db,
            event_sender,
            catalog,
        }
    }

    /// Adds a listing to the customer's cart, creating the cart on first use.
    ///
    /// Behavior:
    /// - A non-positive quantity removes the line instead.
    /// - An existing line for the same listing merges quantities and keeps
    ///   its original price snapshot.
    /// - A listing from a different merchant empties the cart first and
    ///   rebinds it to the new merchant.
    ///
    /// # Errors
    ///
    /// * `ServiceError::NotFound` - The listing does not exist
    /// * `ServiceError::ItemUnavailable` - The listing is currently unavailable
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        customer_id: Uuid,
        input: AddItemInput,
    ) -> Result<CartView, ServiceError> {
        if input.quantity <= 0 {
            return self.remove_item(customer_id, input.listing_id).await;
        }

        let listing = self
            .catalog
            .listing(input.listing_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Listing {} not found", input.listing_id))
            })?;

        if !listing.is_available {
            return Err(ServiceError::ItemUnavailable(listing.name));
        }

        let txn = self.db.begin().await?;

        let mut replaced_merchant: Option<Uuid> = None;
        match cart::Entity::find_by_id(customer_id).one(&txn).await? {
            Some(cart_row) => {
                if let Some(current) = cart_row.merchant_id {
                    if current != listing.merchant_id {
                        cart_item::Entity::delete_many()
                            .filter(cart_item::Column::CartCustomerId.eq(customer_id))
                            .exec(&txn)
                            .await?;
                        replaced_merchant = Some(current);
                    }
                }
                let mut active: cart::ActiveModel = cart_row.into();
                active.merchant_id = Set(Some(listing.merchant_id));
                active.updated_at = Set(Utc::now());
                active.update(&txn).await?;
            }
            None => {
                cart::ActiveModel {
                    customer_id: Set(customer_id),
                    merchant_id: Set(Some(listing.merchant_id)),
                    created_at: Set(Utc::now()),
                    updated_at: Set(Utc::now()),
                }
                .insert(&txn)
                .await?;
            }
        }

        let existing_line = cart_item::Entity::find()
            .filter(cart_item::Column::CartCustomerId.eq(customer_id))
            .filter(cart_item::Column::ListingId.eq(input.listing_id))
            .one(&txn)
            .await?;

        if let Some(line) = existing_line {
            let merged = line.quantity + input.quantity;
            let mut line: cart_item::ActiveModel = line.into();
            line.quantity = Set(merged);
            line.updated_at = Set(Utc::now());
            line.update(&txn).await?;
        } else {
            cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_customer_id: Set(customer_id),
                listing_id: Set(listing.id),
                merchant_id: Set(listing.merchant_id),
                unit_price: Set(listing.price),
                quantity: Set(input.quantity),
                created_at: Set(Utc::now()),
                updated_at: Set(Utc::now()),
            }
            .insert(&txn)
            .await?;
        }

        let view = self.load_view(&txn, customer_id).await?;
        txn.commit().await?;

        if let Some(old_merchant_id) = replaced_merchant {
            self.event_sender
                .send_or_log(Event::CartMerchantReplaced {
                    customer_id,
                    old_merchant_id,
                    new_merchant_id: listing.merchant_id,
                })
                .await;
        }
        self.event_sender
            .send_or_log(Event::CartItemAdded {
                customer_id,
                listing_id: listing.id,
                quantity: input.quantity,
            })
            .await;

        info!(
            "Added listing {} x{} to cart {}",
            listing.id, input.quantity, customer_id
        );
        Ok(view)
    }

    /// Sets a cart line to an absolute quantity. Zero or negative removes
    /// the line.
    ///
    /// # Errors
    ///
    /// * `ServiceError::NotFound` - The listing is not in the cart
    #[instrument(skip(self))]
    pub async fn set_item_quantity(
        &self,
        customer_id: Uuid,
        listing_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity <= 0 {
            return self.remove_item(customer_id, listing_id).await;
        }

        let txn = self.db.begin().await?;

        let line = cart_item::Entity::find()
            .filter(cart_item::Column::CartCustomerId.eq(customer_id))
            .filter(cart_item::Column::ListingId.eq(listing_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Listing {} is not in the cart", listing_id))
            })?;

        let mut active: cart_item::ActiveModel = line.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        let view = self.load_view(&txn, customer_id).await?;
        txn.commit().await?;

        info!(
            "Set listing {} to x{} in cart {}",
            listing_id, quantity, customer_id
        );
        Ok(view)
    }

    /// Removes a listing from the cart. Removing a line that is not present
    /// is a no-op; removing the last line unbinds the cart from its merchant.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        customer_id: Uuid,
        listing_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let txn = self.db.begin().await?;

        let deleted = cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartCustomerId.eq(customer_id))
            .filter(cart_item::Column::ListingId.eq(listing_id))
            .exec(&txn)
            .await?;

        let remaining = cart_item::Entity::find()
            .filter(cart_item::Column::CartCustomerId.eq(customer_id))
            .count(&txn)
            .await?;

        if remaining == 0 {
            if let Some(cart_row) = cart::Entity::find_by_id(customer_id).one(&txn).await? {
                let mut active: cart::ActiveModel = cart_row.into();
                active.merchant_id = Set(None);
                active.updated_at = Set(Utc::now());
                active.update(&txn).await?;
            }
        }

        let view = self.load_view(&txn, customer_id).await?;
        txn.commit().await?;

        if deleted.rows_affected > 0 {
            self.event_sender
                .send_or_log(Event::CartItemRemoved {
                    customer_id,
                    listing_id,
                })
                .await;
        }

        Ok(view)
    }

    /// Returns the customer's cart. A customer without a cart row gets an
    /// empty view rather than a 404.
    pub async fn get_cart(&self, customer_id: Uuid) -> Result<CartView, ServiceError> {
        self.load_view(&*self.db, customer_id).await
    }

    /// Empties the cart and unbinds it from its merchant.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, customer_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartCustomerId.eq(customer_id))
            .exec(&txn)
            .await?;

        if let Some(cart_row) = cart::Entity::find_by_id(customer_id).one(&txn).await? {
            let mut active: cart::ActiveModel = cart_row.into();
            active.merchant_id = Set(None);
            active.updated_at = Set(Utc::now());
            active.update(&txn).await?;
        }

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartCleared(customer_id))
            .await;

        info!("Cleared cart {}", customer_id);
        Ok(())
    }

    async fn load_view(
        &self,
        conn: &impl ConnectionTrait,
        customer_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let cart_row = cart::Entity::find_by_id(customer_id).one(conn).await?;
        let items = cart_item::Entity::find()
            .filter(cart_item::Column::CartCustomerId.eq(customer_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(conn)
            .await?;

        let lines: Vec<CartLineView> = items
            .into_iter()
            .map(|item| CartLineView {
                listing_id: item.listing_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
                line_total: item.unit_price * Decimal::from(item.quantity),
            })
            .collect();
        let subtotal = lines.iter().map(|line| line.line_total).sum();

        Ok(CartView {
            customer_id,
            merchant_id: cart_row.and_then(|c| c.merchant_id),
            subtotal,
            items: lines,
        })
    }
}

/// Input for adding a listing to the cart.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AddItemInput {
    pub listing_id: Uuid,
    /// Quantity to add on top of any existing line. Zero or negative removes
    /// the line.
    pub quantity: i32,
}

/// One cart line as returned to clients. Prices are display snapshots.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartLineView {
    pub listing_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

/// Cart as returned to clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartView {
    pub customer_id: Uuid,
    pub merchant_id: Option<Uuid>,
    pub subtotal: Decimal,
    pub items: Vec<CartLineView>,
}

impl CartView {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn add_item_input_deserializes() {
        let json = r#"{
            "listing_id": "550e8400-e29b-41d4-a716-446655440000",
            "quantity": 3
        }"#;

        let input: AddItemInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.quantity, 3);
        assert_eq!(
            input.listing_id.to_string(),
            "550e8400-e29b-41d4-a716-446655440000"
        );
    }

    #[test]
    fn line_totals_multiply_the_snapshot_price() {
        let line = CartLineView {
            listing_id: Uuid::new_v4(),
            quantity: 3,
            unit_price: dec!(12.50),
            line_total: dec!(12.50) * Decimal::from(3),
        };

        assert_eq!(line.line_total, dec!(37.50));
    }

    #[test]
    fn empty_view_has_no_merchant() {
        let view = CartView {
            customer_id: Uuid::new_v4(),
            merchant_id: None,
            subtotal: Decimal::ZERO,
            items: vec![],
        };

        assert!(view.is_empty());
        assert!(view.merchant_id.is_none());
    }

    #[test]
    fn subtotal_sums_line_totals() {
        let lines = [dec!(10.00), dec!(22.50), dec!(3.25)];
        let subtotal: Decimal = lines.iter().copied().sum();

        assert_eq!(subtotal, dec!(35.75));
    }
}
