pub mod state_machine;

use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use sea_orm::sea_query::Expr;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::Identity,
    config::AppConfig,
    entities::{order, order_item, order_status_history, ActorRole, DeliveryType, OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    metrics,
    services::realtime::RealtimeService,
};

/// Owns every mutation of an order after checkout.
///
/// All writers, whatever their role, go through [`update_status`], which is
/// the single enforcement point for actor authorization, graph validity and
/// the optimistic version check. Its rules run in a fixed sequence:
///
/// 1. Role gate, before the order's current status is even consulted.
/// 2. Load plus participant check (customer, merchant or assigned courier).
/// 3. Requesting the current status again is an idempotent no-op.
/// 4. Cancellation policy for `cancelled`, graph validity for everything else.
/// 5. The delivered guard: no completion without a courier unless the order
///    is a pickup handoff.
/// 6. One conditional UPDATE keyed on the version that was read; zero rows
///    means a concurrent writer won and the caller gets a conflict.
/// 7. History row in the same transaction, then fan-out after commit.
///
/// [`update_status`]: OrderService::update_status
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    realtime: Arc<RealtimeService>,
    config: Arc<AppConfig>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        realtime: Arc<RealtimeService>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            realtime,
            config,
        }
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    pub async fn get_order_by_number(&self, order_number: &str) -> Result<order::Model, ServiceError> {
        order::Entity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_number)))
    }

    /// Order with its line items and full status history.
    pub async fn get_order_details(&self, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        let order = self.get_order(order_id).await?;
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        let history = order_status_history::Entity::find()
            .filter(order_status_history::Column::OrderId.eq(order_id))
            .order_by_asc(order_status_history::Column::RecordedAt)
            .all(&*self.db)
            .await?;

        Ok(OrderDetails {
            order,
            items,
            history,
        })
    }

    pub async fn get_status_history(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_status_history::Model>, ServiceError> {
        self.get_order(order_id).await?;
        Ok(order_status_history::Entity::find()
            .filter(order_status_history::Column::OrderId.eq(order_id))
            .order_by_asc(order_status_history::Column::RecordedAt)
            .all(&*self.db)
            .await?)
    }

    /// Lists orders the actor participates in, newest first. System actors
    /// see everything.
    pub async fn list_orders(
        &self,
        actor: Identity,
        filter: OrderListFilter,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let mut query = order::Entity::find();
        query = match actor.role {
            ActorRole::Customer => query.filter(order::Column::CustomerId.eq(actor.user_id)),
            ActorRole::Merchant => query.filter(order::Column::MerchantId.eq(actor.user_id)),
            ActorRole::Courier => query.filter(order::Column::CourierId.eq(actor.user_id)),
            ActorRole::System => query,
        };
        if let Some(status) = filter.status {
            query = query.filter(order::Column::Status.eq(status));
        }

        let paginator = query
            .order_by_desc(order::Column::PlacedAt)
            .paginate(&*self.db, filter.per_page.max(1));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(filter.page.saturating_sub(1)).await?;

        Ok((orders, total))
    }

    /// The single transition operation. See the type-level docs for the rule
    /// sequence; everything observable happens only if the conditional write
    /// commits.
    #[instrument(skip(self, input), fields(order_id = %order_id, target = %input.status, actor_id = %actor.user_id))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        actor: Identity,
        input: UpdateStatusInput,
    ) -> Result<order::Model, ServiceError> {
        let target = input.status;

        if !state_machine::role_may_request(actor.role, target) {
            return Err(ServiceError::AccessDenied(format!(
                "Role {} may not request status {}",
                actor.role, target
            )));
        }

        let txn = self.db.begin().await?;

        let order = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if !is_participant(&order, &actor) {
            return Err(ServiceError::AccessDenied(
                "Not a participant in this order".to_string(),
            ));
        }

        if order.status == target {
            return Ok(order);
        }

        if target == OrderStatus::Cancelled {
            let window = Duration::minutes(self.config.customer_cancel_window_minutes);
            if !state_machine::may_cancel(actor.role, order.status, order.placed_at, window, Utc::now())
            {
                return Err(ServiceError::CancellationNotAllowed(cancellation_refusal(
                    actor.role,
                    order.status,
                )));
            }
        } else if !state_machine::is_valid_transition(order.status, target) {
            return Err(ServiceError::InvalidTransition {
                from: order.status.to_string(),
                to: target.to_string(),
            });
        }

        if target == OrderStatus::Delivered && order.delivery_type != DeliveryType::Pickup {
            if order.courier_id.is_none()
                || state_machine::requires_pickup_handoff(order.status, target)
            {
                return Err(ServiceError::NoDeliveryAssigned);
            }
        }

        let now = Utc::now();
        let mut update = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(target))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(now));

        update = match target {
            OrderStatus::Confirmed if order.confirmed_at.is_none() => {
                update.col_expr(order::Column::ConfirmedAt, Expr::value(now))
            }
            OrderStatus::Ready if order.ready_at.is_none() => {
                update.col_expr(order::Column::ReadyAt, Expr::value(now))
            }
            OrderStatus::PickedUp if order.picked_up_at.is_none() => {
                update.col_expr(order::Column::PickedUpAt, Expr::value(now))
            }
            OrderStatus::Delivered if order.delivered_at.is_none() => {
                update.col_expr(order::Column::DeliveredAt, Expr::value(now))
            }
            OrderStatus::Cancelled => update.col_expr(
                order::Column::CancellationReason,
                Expr::value(input.note.clone()),
            ),
            _ => update,
        };

        let result = update
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Version.eq(order.version))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(order_id));
        }

        order_status_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            status: Set(target),
            actor_id: Set(actor.user_id),
            actor_role: Set(actor.role),
            note: Set(input.note.clone()),
            recorded_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        let old_status = order.status;
        metrics::STATUS_TRANSITIONS.inc();
        info!(
            "Order {} moved {} -> {} by {} {}",
            order_id, old_status, target, actor.role, actor.user_id
        );

        self.realtime.publish_status(order_id, target, actor.role, now);

        if target == OrderStatus::Cancelled {
            metrics::ORDERS_CANCELLED.inc();
            self.event_sender
                .send_or_log(Event::OrderCancelled {
                    order_id,
                    reason: input.note.unwrap_or_default(),
                })
                .await;
        } else {
            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id,
                    old_status: old_status.to_string(),
                    new_status: target.to_string(),
                })
                .await;
        }

        if target.is_terminal() {
            self.realtime.finish_order(order_id);
            self.event_sender.send_or_log(Event::TrackingEnded(order_id)).await;
        }

        self.get_order(order_id).await
    }

    /// Cancels an order on behalf of the actor.
    #[instrument(skip(self, reason), fields(order_id = %order_id, actor_id = %actor.user_id))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        actor: Identity,
        reason: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        self.update_status(
            order_id,
            actor,
            UpdateStatusInput {
                status: OrderStatus::Cancelled,
                note: reason,
            },
        )
        .await
    }
}

/// Whether the actor is one of the three parties on the order. System
/// actors participate in everything.
pub fn is_participant(order: &order::Model, actor: &Identity) -> bool {
    match actor.role {
        ActorRole::System => true,
        ActorRole::Customer => order.customer_id == actor.user_id,
        ActorRole::Merchant => order.merchant_id == actor.user_id,
        ActorRole::Courier => order.courier_id == Some(actor.user_id),
    }
}

fn cancellation_refusal(role: ActorRole, current: OrderStatus) -> String {
    if current.is_terminal() {
        return format!("Order is already {}", current);
    }
    match role {
        ActorRole::Customer if current == OrderStatus::Preparing => {
            "The cancellation window has closed".to_string()
        }
        ActorRole::Customer => "The order is already out for delivery".to_string(),
        ActorRole::Courier => "Couriers report an issue instead of cancelling".to_string(),
        _ => format!("Orders in status {} can no longer be cancelled", current),
    }
}

/// Input for the transition operation.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateStatusInput {
    /// Target status. Accepts `completed` as a synonym for `delivered` and
    /// `canceled` for `cancelled`.
    pub status: OrderStatus,
    pub note: Option<String>,
}

/// Input for the cancellation endpoint.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CancelOrderInput {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema, utoipa::IntoParams)]
pub struct OrderListFilter {
    pub status: Option<OrderStatus>,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

/// Order with line items and history, as returned to participants.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub history: Vec<order_status_history::Model>,
}
