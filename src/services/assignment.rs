use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    db::{with_retry, DbRetryPolicy, RetryConfig},
    entities::{order, order_status_history, ActorRole, DeliveryType, OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    metrics,
    services::catalog::{MerchantDirectory, MerchantProfile},
    services::geo::{haversine_km, GeoPoint},
    services::orders::state_machine,
    services::realtime::RealtimeService,
};

/// Coordinates which courier delivers which order.
///
/// The claim path is the contended one: N couriers race for the same ready
/// order and at most one may win. Every mutation here is a single
/// conditional UPDATE whose WHERE clause restates the eligibility check, so
/// a read-then-write race cannot hand the same order to two couriers. Zero
/// rows affected means the precondition no longer held at commit time, and
/// a follow-up read disambiguates why.
#[derive(Clone)]
pub struct AssignmentService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    realtime: Arc<RealtimeService>,
    merchants: Arc<dyn MerchantDirectory>,
    config: Arc<AppConfig>,
    retry: RetryConfig,
}

impl AssignmentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        realtime: Arc<RealtimeService>,
        merchants: Arc<dyn MerchantDirectory>,
        config: Arc<AppConfig>,
    ) -> Self {
        let retry = RetryConfig::from_app_config(&config);
        Self {
            db,
            event_sender,
            realtime,
            merchants,
            config,
            retry,
        }
    }

    /// Claims an order for a courier.
    ///
    /// Safe to retry: a courier re-claiming an order they already hold gets
    /// the order back, not a conflict.
    #[instrument(skip(self), fields(courier_id = %courier_id, order_id = %order_id))]
    pub async fn claim_delivery(
        &self,
        courier_id: Uuid,
        order_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        metrics::CLAIM_ATTEMPTS.inc();

        let outcome = with_retry(&self.retry, DbRetryPolicy, "claim_delivery", || {
            self.try_claim(courier_id, order_id)
        })
        .await;

        if let Err(ServiceError::AssignmentConflict(_)) = &outcome {
            metrics::CLAIM_CONFLICTS.inc();
        }
        outcome
    }

    async fn try_claim(
        &self,
        courier_id: Uuid,
        order_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let claimable = state_machine::claimable_statuses(self.config.allow_claim_before_ready);
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let result = order::Entity::update_many()
            .col_expr(order::Column::CourierId, Expr::value(courier_id))
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Assigned))
            .col_expr(order::Column::AssignedAt, Expr::value(now))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::CourierId.is_null())
            .filter(order::Column::Status.is_in(claimable.to_vec()))
            .filter(order::Column::DeliveryType.eq(DeliveryType::Courier))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            let order = order::Entity::find_by_id(order_id)
                .one(&txn)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

            return match order.courier_id {
                // Retried claim: the courier already holds this one.
                Some(holder) if holder == courier_id => Ok(order),
                Some(_) => Err(ServiceError::AssignmentConflict(order_id)),
                None if order.delivery_type == DeliveryType::Pickup => {
                    Err(ServiceError::NotEligible(
                        "Pickup orders are handed to the customer directly".to_string(),
                    ))
                }
                None => Err(ServiceError::NotEligible(format!(
                    "Order is {} and cannot be claimed",
                    order.status
                ))),
            };
        }

        order_status_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            status: Set(OrderStatus::Assigned),
            actor_id: Set(courier_id),
            actor_role: Set(ActorRole::Courier),
            note: Set(None),
            recorded_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!("Courier {} claimed order {}", courier_id, order_id);
        self.realtime
            .publish_status(order_id, OrderStatus::Assigned, ActorRole::Courier, now);
        self.event_sender
            .send_or_log(Event::DeliveryClaimed {
                order_id,
                courier_id,
            })
            .await;

        self.fetch_order(order_id).await
    }

    /// Returns a claimed order to the assignable pool.
    ///
    /// Only the assigned courier may release. Like claim this is retry-safe:
    /// a release that already happened reports the released order.
    #[instrument(skip(self, reason), fields(courier_id = %courier_id, order_id = %order_id))]
    pub async fn release_delivery(
        &self,
        courier_id: Uuid,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        with_retry(&self.retry, DbRetryPolicy, "release_delivery", || {
            self.try_release(courier_id, order_id, reason.clone())
        })
        .await
    }

    async fn try_release(
        &self,
        courier_id: Uuid,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let result = order::Entity::update_many()
            .col_expr(order::Column::CourierId, Expr::value(Option::<Uuid>::None))
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Ready))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::CourierId.eq(courier_id))
            .filter(order::Column::Status.is_in(state_machine::COURIER_HOLDING_STATUSES.to_vec()))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            let order = order::Entity::find_by_id(order_id)
                .one(&txn)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

            return match order.courier_id {
                // Already back in the pool; retries land here.
                None if order.status == OrderStatus::Ready => Ok(order),
                None => Err(ServiceError::NotEligible(
                    "Order has no courier attached".to_string(),
                )),
                Some(holder) if holder != courier_id => Err(ServiceError::AccessDenied(
                    "Only the assigned courier may release this delivery".to_string(),
                )),
                Some(_) => Err(ServiceError::NotEligible(format!(
                    "Order is {} and cannot be released",
                    order.status
                ))),
            };
        }

        order_status_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            status: Set(OrderStatus::Ready),
            actor_id: Set(courier_id),
            actor_role: Set(ActorRole::Courier),
            note: Set(reason.clone()),
            recorded_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!("Courier {} released order {}", courier_id, order_id);
        self.realtime
            .publish_status(order_id, OrderStatus::Ready, ActorRole::Courier, now);
        self.event_sender
            .send_or_log(Event::DeliveryReleased {
                order_id,
                courier_id,
                reason: reason.unwrap_or_default(),
            })
            .await;

        self.fetch_order(order_id).await
    }

    /// Hands an order to a new courier, releasing the current one if any.
    ///
    /// System-actor operation. Both steps ride one transaction so the order
    /// is never observable as unclaimed mid-handoff; the history still shows
    /// the full `... -> ready -> assigned` walk.
    #[instrument(skip(self, reason), fields(order_id = %order_id, new_courier_id = %new_courier_id))]
    pub async fn reassign_delivery(
        &self,
        order_id: Uuid,
        new_courier_id: Uuid,
        reason: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let claimable = state_machine::claimable_statuses(self.config.allow_claim_before_ready);
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let order = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.courier_id == Some(new_courier_id) {
            return Ok(order);
        }
        if order.delivery_type == DeliveryType::Pickup {
            return Err(ServiceError::NotEligible(
                "Pickup orders are handed to the customer directly".to_string(),
            ));
        }

        let previous_courier = order.courier_id;
        match previous_courier {
            Some(_) if !state_machine::is_release_source(order.status) => {
                return Err(ServiceError::NotEligible(format!(
                    "Order is {} and cannot be handed off",
                    order.status
                )));
            }
            None if !claimable.contains(&order.status) => {
                return Err(ServiceError::NotEligible(format!(
                    "Order is {} and cannot be assigned",
                    order.status
                )));
            }
            _ => {}
        }

        if let Some(previous) = previous_courier {
            let released = order::Entity::update_many()
                .col_expr(order::Column::CourierId, Expr::value(Option::<Uuid>::None))
                .col_expr(order::Column::Status, Expr::value(OrderStatus::Ready))
                .col_expr(
                    order::Column::Version,
                    Expr::col(order::Column::Version).add(1),
                )
                .col_expr(order::Column::UpdatedAt, Expr::value(now))
                .filter(order::Column::Id.eq(order_id))
                .filter(order::Column::CourierId.eq(previous))
                .filter(
                    order::Column::Status
                        .is_in(state_machine::COURIER_HOLDING_STATUSES.to_vec()),
                )
                .exec(&txn)
                .await?;
            if released.rows_affected == 0 {
                return Err(ServiceError::ConcurrentModification(order_id));
            }

            order_status_history::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                status: Set(OrderStatus::Ready),
                actor_id: Set(previous),
                actor_role: Set(ActorRole::System),
                note: Set(reason.clone()),
                recorded_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        let claimed = order::Entity::update_many()
            .col_expr(order::Column::CourierId, Expr::value(new_courier_id))
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Assigned))
            .col_expr(order::Column::AssignedAt, Expr::value(now))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::CourierId.is_null())
            .exec(&txn)
            .await?;
        if claimed.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(order_id));
        }

        order_status_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            status: Set(OrderStatus::Assigned),
            actor_id: Set(new_courier_id),
            actor_role: Set(ActorRole::System),
            note: Set(None),
            recorded_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(
            "Order {} reassigned from {:?} to courier {}",
            order_id, previous_courier, new_courier_id
        );
        if previous_courier.is_some() {
            self.realtime
                .publish_status(order_id, OrderStatus::Ready, ActorRole::System, now);
        }
        self.realtime
            .publish_status(order_id, OrderStatus::Assigned, ActorRole::System, now);

        if let Some(previous) = previous_courier {
            self.event_sender
                .send_or_log(Event::DeliveryReleased {
                    order_id,
                    courier_id: previous,
                    reason: reason.unwrap_or_default(),
                })
                .await;
        }
        self.event_sender
            .send_or_log(Event::DeliveryReassigned {
                order_id,
                new_courier_id,
            })
            .await;

        self.fetch_order(order_id).await
    }

    /// Orders a courier could claim right now, plus their own active work.
    ///
    /// New opportunities are proximity-filtered against the merchant pickup
    /// point when a position is known, either passed explicitly or taken
    /// from the courier's last reported location. The courier's own
    /// deliveries are always listed regardless of distance.
    #[instrument(skip(self), fields(courier_id = %courier_id))]
    pub async fn available_deliveries(
        &self,
        courier_id: Uuid,
        near: Option<GeoPoint>,
        radius_km: Option<f64>,
    ) -> Result<Vec<AvailableDelivery>, ServiceError> {
        let claimable = state_machine::claimable_statuses(self.config.allow_claim_before_ready);

        let orders = order::Entity::find()
            .filter(
                Condition::any()
                    .add(
                        Condition::all()
                            .add(order::Column::CourierId.is_null())
                            .add(order::Column::Status.is_in(claimable.to_vec()))
                            .add(order::Column::DeliveryType.eq(DeliveryType::Courier)),
                    )
                    .add(
                        Condition::all()
                            .add(order::Column::CourierId.eq(courier_id))
                            .add(
                                order::Column::Status
                                    .is_in(state_machine::COURIER_HOLDING_STATUSES.to_vec()),
                            ),
                    ),
            )
            .order_by_asc(order::Column::PlacedAt)
            .all(&*self.db)
            .await?;

        let origin = near.or_else(|| {
            self.realtime
                .courier_position(courier_id)
                .map(|presence| presence.location)
        });
        let radius = radius_km.unwrap_or(self.config.default_search_radius_km);

        let mut profiles: HashMap<Uuid, Option<MerchantProfile>> = HashMap::new();
        let mut feed = Vec::with_capacity(orders.len());

        for order in orders {
            let claimed_by_me = order.courier_id == Some(courier_id);

            let profile = match profiles.get(&order.merchant_id) {
                Some(cached) => cached.clone(),
                None => {
                    let fetched = self.merchants.merchant(order.merchant_id).await?;
                    profiles.insert(order.merchant_id, fetched.clone());
                    fetched
                }
            };
            let pickup = profile.as_ref().map(|p| p.pickup);
            let distance_km = match (origin, pickup) {
                (Some(from), Some(to)) => Some(haversine_km(from, to)),
                _ => None,
            };

            if !claimed_by_me {
                if let Some(distance) = distance_km {
                    if distance > radius {
                        continue;
                    }
                }
            }

            feed.push(AvailableDelivery {
                order,
                merchant_name: profile.map(|p| p.name),
                pickup,
                distance_km,
                claimed_by_me,
            });
        }

        feed.sort_by(compare_feed_rows);
        Ok(feed)
    }

    async fn fetch_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }
}

/// One row of the courier-facing availability feed. Merchant fields are
/// optional because the profile lives in a replicated table that can lag.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AvailableDelivery {
    pub order: order::Model,
    pub merchant_name: Option<String>,
    pub pickup: Option<GeoPoint>,
    pub distance_km: Option<f64>,
    pub claimed_by_me: bool,
}

/// Own work first, then nearest first. Rows without a computable distance
/// keep their placement order at the end.
fn compare_feed_rows(a: &AvailableDelivery, b: &AvailableDelivery) -> Ordering {
    b.claimed_by_me
        .cmp(&a.claimed_by_me)
        .then_with(|| match (a.distance_km, b.distance_km) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn feed_row(claimed_by_me: bool, distance_km: Option<f64>) -> AvailableDelivery {
        let order = order::Model {
            id: Uuid::new_v4(),
            order_number: "ORD-FEED".to_string(),
            customer_id: Uuid::new_v4(),
            merchant_id: Uuid::new_v4(),
            courier_id: None,
            status: OrderStatus::Ready,
            delivery_type: DeliveryType::Courier,
            subtotal: dec!(20.00),
            delivery_fee: dec!(3.00),
            service_fee: dec!(2.00),
            tax: dec!(1.60),
            total: dec!(26.60),
            payment_method: "card".to_string(),
            payment_status: "pending".to_string(),
            delivery_street: "1 Main St".to_string(),
            delivery_city: "Springfield".to_string(),
            delivery_lat: 52.5,
            delivery_lng: 13.4,
            contact_phone: "+4915112345678".to_string(),
            delivery_instructions: None,
            cancellation_reason: None,
            version: 0,
            placed_at: Utc::now(),
            confirmed_at: None,
            ready_at: None,
            assigned_at: None,
            picked_up_at: None,
            delivered_at: None,
            created_at: Utc::now(),
            updated_at: None,
        };

        AvailableDelivery {
            order,
            merchant_name: Some("Trattoria".to_string()),
            pickup: Some(GeoPoint::new(52.52, 13.405)),
            distance_km,
            claimed_by_me,
        }
    }

    #[test]
    fn own_work_sorts_ahead_of_new_opportunities() {
        let mut feed = vec![
            feed_row(false, Some(0.4)),
            feed_row(true, Some(7.2)),
            feed_row(false, Some(2.1)),
        ];
        feed.sort_by(compare_feed_rows);

        assert!(feed[0].claimed_by_me);
        assert_eq!(feed[1].distance_km, Some(0.4));
        assert_eq!(feed[2].distance_km, Some(2.1));
    }

    #[test]
    fn unknown_distances_sort_last() {
        let mut feed = vec![
            feed_row(false, None),
            feed_row(false, Some(5.0)),
            feed_row(false, Some(1.0)),
        ];
        feed.sort_by(compare_feed_rows);

        assert_eq!(feed[0].distance_km, Some(1.0));
        assert_eq!(feed[1].distance_km, Some(5.0));
        assert_eq!(feed[2].distance_km, None);
    }
}
