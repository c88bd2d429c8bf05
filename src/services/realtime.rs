use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::Identity,
    config::AppConfig,
    entities::{order, ActorRole, OrderStatus},
    errors::ServiceError,
    metrics,
    services::geo::{haversine_meters, GeoPoint},
    services::orders::{is_participant, state_machine},
};

/// Per-order fan-out of status and courier-location events.
///
/// Each order is an in-process broadcast topic. Participants subscribe and
/// receive events at-least-once while connected; there is no durable queue,
/// a reconnecting client re-fetches current state instead of replaying.
/// Dropping the receiver is the unsubscribe; topics and dedup state are torn
/// down when the order reaches a terminal status.
///
/// Couriers may report locations at high frequency. An update is broadcast
/// only when both the minimum interval and the minimum displacement since
/// the last accepted update are cleared, which bounds fan-out volume without
/// hiding real movement.
pub struct RealtimeService {
    db: Arc<DatabaseConnection>,
    topics: DashMap<Uuid, broadcast::Sender<TrackingEvent>>,
    gates: DashMap<Uuid, LocationGate>,
    presence: DashMap<Uuid, CourierPresence>,
    channel_capacity: usize,
    min_interval: Duration,
    min_distance_meters: f64,
}

impl RealtimeService {
    pub fn new(db: Arc<DatabaseConnection>, config: &AppConfig) -> Self {
        Self {
            db,
            topics: DashMap::new(),
            gates: DashMap::new(),
            presence: DashMap::new(),
            channel_capacity: config.tracking_channel_capacity,
            min_interval: Duration::seconds(config.location_min_interval_secs as i64),
            min_distance_meters: config.location_min_distance_meters,
        }
    }

    /// Joins the order's topic. Only participants may subscribe, and orders
    /// already in a terminal status have nothing left to say.
    #[instrument(skip(self, actor), fields(order_id = %order_id, user_id = %actor.user_id))]
    pub async fn subscribe(
        &self,
        order_id: Uuid,
        actor: Identity,
    ) -> Result<broadcast::Receiver<TrackingEvent>, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if !is_participant(&order, &actor) {
            return Err(ServiceError::AccessDenied(
                "Not a participant in this order".to_string(),
            ));
        }
        if order.status.is_terminal() {
            return Err(ServiceError::NotEligible(format!(
                "Tracking for order {} has ended",
                order_id
            )));
        }

        let sender = self
            .topics
            .entry(order_id)
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0);
        Ok(sender.subscribe())
    }

    /// Broadcasts a committed status change to current subscribers.
    pub fn publish_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        actor_role: ActorRole,
        occurred_at: DateTime<Utc>,
    ) {
        if let Some(sender) = self.topics.get(&order_id) {
            let _ = sender.send(TrackingEvent::StatusChanged {
                order_id,
                status,
                actor_role,
                occurred_at,
            });
        }
    }

    /// Accepts or suppresses a courier location ping.
    ///
    /// The courier must be the one assigned to the order, and the order must
    /// be in an active delivery status. The courier's presence is refreshed
    /// on every well-formed ping, including suppressed ones, so availability
    /// queries always see a current position.
    #[instrument(skip(self), fields(order_id = %order_id, courier_id = %courier_id))]
    pub async fn report_location(
        &self,
        courier_id: Uuid,
        order_id: Uuid,
        location: GeoPoint,
    ) -> Result<LocationOutcome, ServiceError> {
        if !location.is_valid() {
            return Err(ServiceError::ValidationError(
                "Coordinates must lie within [-90, 90] x [-180, 180]".to_string(),
            ));
        }

        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.courier_id != Some(courier_id) {
            return Err(ServiceError::AccessDenied(
                "Only the assigned courier may report locations for this order".to_string(),
            ));
        }
        if !state_machine::is_active_delivery(order.status) {
            return Err(ServiceError::NotEligible(format!(
                "Order is {} and not being delivered",
                order.status
            )));
        }

        let now = Utc::now();
        self.presence.insert(
            courier_id,
            CourierPresence {
                location,
                recorded_at: now,
            },
        );

        let accepted = self
            .gates
            .entry(order_id)
            .or_insert_with(LocationGate::new)
            .admit(location, now, self.min_interval, self.min_distance_meters);

        if accepted {
            metrics::LOCATION_ACCEPTED.inc();
            if let Some(sender) = self.topics.get(&order_id) {
                let _ = sender.send(TrackingEvent::CourierLocation {
                    order_id,
                    courier_id,
                    location,
                    recorded_at: now,
                });
            }
            Ok(LocationOutcome::Accepted)
        } else {
            metrics::LOCATION_SUPPRESSED.inc();
            debug!("Suppressed location ping for order {}", order_id);
            Ok(LocationOutcome::Suppressed)
        }
    }

    /// Tears down tracking for an order that reached a terminal status:
    /// notifies subscribers, then drops the topic and its dedup state.
    pub fn finish_order(&self, order_id: Uuid) {
        self.gates.remove(&order_id);
        if let Some((_, sender)) = self.topics.remove(&order_id) {
            let _ = sender.send(TrackingEvent::TrackingEnded { order_id });
        }
    }

    /// Last known courier position, if the courier has pinged recently.
    pub fn courier_position(&self, courier_id: Uuid) -> Option<CourierPresence> {
        self.presence.get(&courier_id).map(|entry| *entry)
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self, order_id: Uuid) -> usize {
        self.topics
            .get(&order_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

/// Events delivered over an order's tracking topic.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackingEvent {
    StatusChanged {
        order_id: Uuid,
        status: OrderStatus,
        actor_role: ActorRole,
        occurred_at: DateTime<Utc>,
    },
    CourierLocation {
        order_id: Uuid,
        courier_id: Uuid,
        location: GeoPoint,
        recorded_at: DateTime<Utc>,
    },
    TrackingEnded {
        order_id: Uuid,
    },
}

/// Outcome of a location ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LocationOutcome {
    Accepted,
    Suppressed,
}

/// A courier's last reported position.
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
pub struct CourierPresence {
    pub location: GeoPoint,
    pub recorded_at: DateTime<Utc>,
}

/// Deduplication state for one order's location stream.
///
/// The first ping always passes. Every later ping must clear both the time
/// and the distance threshold against the last accepted ping; a suppressed
/// ping does not advance the reference, so standing still never broadcasts
/// again no matter how much time passes.
#[derive(Debug, Default)]
struct LocationGate {
    last_accepted: Option<(GeoPoint, DateTime<Utc>)>,
}

impl LocationGate {
    fn new() -> Self {
        Self::default()
    }

    fn admit(
        &mut self,
        point: GeoPoint,
        at: DateTime<Utc>,
        min_interval: Duration,
        min_distance_meters: f64,
    ) -> bool {
        match self.last_accepted {
            None => {
                self.last_accepted = Some((point, at));
                true
            }
            Some((prev_point, prev_at)) => {
                let elapsed = at.signed_duration_since(prev_at);
                let displacement = haversine_meters(prev_point, point);
                if elapsed >= min_interval && displacement >= min_distance_meters {
                    self.last_accepted = Some((point, at));
                    true
                } else {
                    false
                }
            }
        }
    }
}
