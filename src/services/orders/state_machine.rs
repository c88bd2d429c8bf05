//! The order lifecycle transition table.
//!
//! Status is data and the graph is a pure function, so every rule here is
//! auditable in one screen and testable without a database. The service
//! layer owns persistence; this module owns which edges exist and who may
//! request them.

use chrono::{DateTime, Duration, Utc};

use crate::entities::{ActorRole, OrderStatus};

use OrderStatus::*;

/// Forward edges of the lifecycle graph, keyed by current status.
///
/// `Assigned` never appears as a target here: claiming a delivery is the
/// only path into it, and that path also sets the courier id. Release back
/// to `Ready` is likewise reserved for the assignment coordinator (see
/// [`is_release_source`]).
pub fn allowed_next(from: OrderStatus) -> &'static [OrderStatus] {
    match from {
        Pending => &[Confirmed, Cancelled],
        Confirmed => &[Preparing, Cancelled],
        Preparing => &[Ready, Cancelled],
        Ready => &[Assigned, Delivered, Cancelled],
        Assigned => &[PickedUp, Issue, Delivered, Cancelled],
        PickedUp => &[InTransit, Issue, Cancelled],
        InTransit => &[Delivered, Issue, Cancelled],
        Issue => &[InTransit, Cancelled],
        Delivered | Cancelled => &[],
    }
}

pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    allowed_next(from).contains(&to)
}

/// Statuses in which a courier holds the order. Used both as the set the
/// assignment coordinator may release back to `Ready` and as the window in
/// which location reports are accepted.
pub const COURIER_HOLDING_STATUSES: [OrderStatus; 4] = [Assigned, PickedUp, InTransit, Issue];

/// Statuses the assignment coordinator may release back to [`Ready`] when a
/// courier hands an order off. These edges are not requestable through the
/// general status-update path.
pub fn is_release_source(from: OrderStatus) -> bool {
    COURIER_HOLDING_STATUSES.contains(&from)
}

/// Statuses in which an order can be claimed by a courier.
pub fn claimable_statuses(allow_claim_before_ready: bool) -> &'static [OrderStatus] {
    if allow_claim_before_ready {
        &[Preparing, Ready]
    } else {
        &[Ready]
    }
}

/// Statuses during which the assigned courier may report locations.
pub fn is_active_delivery(status: OrderStatus) -> bool {
    COURIER_HOLDING_STATUSES.contains(&status)
}

/// The `Ready -> Delivered` and `Assigned -> Delivered` edges model an
/// in-person handoff and are only walkable for pickup orders.
pub fn requires_pickup_handoff(from: OrderStatus, to: OrderStatus) -> bool {
    to == Delivered && matches!(from, Ready | Assigned)
}

/// Role gate, evaluated before graph validity so an unauthorized caller
/// learns nothing about the order's current position in the graph.
pub fn role_may_request(role: ActorRole, target: OrderStatus) -> bool {
    // Pending is initial-only and Assigned is claim-only, for every role.
    if matches!(target, Pending | Assigned) {
        return false;
    }
    match role {
        ActorRole::Customer => target == Cancelled,
        ActorRole::Merchant => matches!(target, Confirmed | Preparing | Ready | Delivered | Cancelled),
        ActorRole::Courier => matches!(target, PickedUp | InTransit | Delivered | Issue),
        ActorRole::System => true,
    }
}

/// Cancellation policy by role.
///
/// Customers may cancel freely before the merchant starts preparing, and
/// during preparation only within the configured window after placement.
/// Merchants may cancel anything they have not yet handed to a courier.
/// Couriers never cancel; they report an issue instead.
pub fn may_cancel(
    role: ActorRole,
    current: OrderStatus,
    placed_at: DateTime<Utc>,
    window: Duration,
    now: DateTime<Utc>,
) -> bool {
    if current.is_terminal() {
        return false;
    }
    match role {
        ActorRole::Customer => match current {
            Pending | Confirmed => true,
            Preparing => now.signed_duration_since(placed_at) <= window,
            _ => false,
        },
        ActorRole::Merchant => matches!(current, Pending | Confirmed | Preparing | Ready),
        ActorRole::Courier => false,
        ActorRole::System => true,
    }
}

/// Which lifecycle timestamp a first entry into `status` stamps.
pub fn stamped_timestamp(status: OrderStatus) -> Option<&'static str> {
    match status {
        Confirmed => Some("confirmed_at"),
        Ready => Some("ready_at"),
        Assigned => Some("assigned_at"),
        PickedUp => Some("picked_up_at"),
        Delivered => Some("delivered_at"),
        _ => None,
    }
}
