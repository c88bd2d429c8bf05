use lazy_static::lazy_static;
use prometheus::{register_int_counter, Encoder, IntCounter, TextEncoder};

use crate::errors::ServiceError;

lazy_static! {
    pub static ref ORDERS_PLACED: IntCounter = register_int_counter!(
        "orders_placed_total",
        "Orders created through checkout"
    )
    .expect("metric can be created");
    pub static ref ORDERS_CANCELLED: IntCounter = register_int_counter!(
        "orders_cancelled_total",
        "Orders cancelled by any actor"
    )
    .expect("metric can be created");
    pub static ref STATUS_TRANSITIONS: IntCounter = register_int_counter!(
        "order_status_transitions_total",
        "Committed order status transitions"
    )
    .expect("metric can be created");
    pub static ref CLAIM_ATTEMPTS: IntCounter = register_int_counter!(
        "delivery_claim_attempts_total",
        "Delivery claim attempts"
    )
    .expect("metric can be created");
    pub static ref CLAIM_CONFLICTS: IntCounter = register_int_counter!(
        "delivery_claim_conflicts_total",
        "Delivery claims lost to another courier"
    )
    .expect("metric can be created");
    pub static ref LOCATION_ACCEPTED: IntCounter = register_int_counter!(
        "courier_locations_accepted_total",
        "Courier location pings forwarded to subscribers"
    )
    .expect("metric can be created");
    pub static ref LOCATION_SUPPRESSED: IntCounter = register_int_counter!(
        "courier_locations_suppressed_total",
        "Courier location pings suppressed by the dedup gate"
    )
    .expect("metric can be created");
}

/// Touches every lazy counter so all of them are registered, and visible as
/// zero, before the first scrape.
pub fn init() {
    ORDERS_PLACED.get();
    ORDERS_CANCELLED.get();
    STATUS_TRANSITIONS.get();
    CLAIM_ATTEMPTS.get();
    CLAIM_CONFLICTS.get();
    LOCATION_ACCEPTED.get();
    LOCATION_SUPPRESSED.get();
}

/// `GET /metrics` in Prometheus text exposition format.
pub async fn metrics_handler() -> Result<String, ServiceError> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| ServiceError::InternalError(format!("Metrics encoding failed: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| ServiceError::InternalError(format!("Metrics are not valid UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        init();
        let before = ORDERS_PLACED.get();
        ORDERS_PLACED.inc();
        ORDERS_PLACED.inc();
        assert_eq!(ORDERS_PLACED.get(), before + 2);
    }

    #[tokio::test]
    async fn exposition_lists_every_domain_counter() {
        init();
        let body = metrics_handler().await.unwrap();

        for name in [
            "orders_placed_total",
            "orders_cancelled_total",
            "order_status_transitions_total",
            "delivery_claim_attempts_total",
            "delivery_claim_conflicts_total",
            "courier_locations_accepted_total",
            "courier_locations_suppressed_total",
        ] {
            assert!(body.contains(name), "missing {name} in exposition");
        }
    }
}
