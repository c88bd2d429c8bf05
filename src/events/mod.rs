use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Handle for publishing domain events onto the in-process pipeline.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the pipeline is down.
    /// Domain operations never fail because a downstream consumer is gone.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            error!("Event pipeline send failed: {}", e);
        }
    }
}

// The events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Order lifecycle
    CheckoutCompleted {
        customer_id: Uuid,
        order_id: Uuid,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderCancelled {
        order_id: Uuid,
        reason: String,
    },

    // Delivery assignment
    DeliveryClaimed {
        order_id: Uuid,
        courier_id: Uuid,
    },
    DeliveryReleased {
        order_id: Uuid,
        courier_id: Uuid,
        reason: String,
    },
    DeliveryReassigned {
        order_id: Uuid,
        new_courier_id: Uuid,
    },

    // Cart activity
    CartItemAdded {
        customer_id: Uuid,
        listing_id: Uuid,
        quantity: i32,
    },
    CartItemRemoved {
        customer_id: Uuid,
        listing_id: Uuid,
    },
    CartMerchantReplaced {
        customer_id: Uuid,
        old_merchant_id: Uuid,
        new_merchant_id: Uuid,
    },
    CartCleared(Uuid),

    // Realtime tracking
    TrackingEnded(Uuid),
}

/// Consumes the pipeline. Notification fan-out to external channels hangs
/// off this loop; today every event is logged.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::CheckoutCompleted {
                customer_id,
                order_id,
            } => {
                info!(
                    "Checkout completed: customer_id={}, order_id={}",
                    customer_id, order_id
                );
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(
                    "Order status changed: order_id={}, {} -> {}",
                    order_id, old_status, new_status
                );
            }
            Event::OrderCancelled { order_id, reason } => {
                info!("Order cancelled: order_id={}, reason={}", order_id, reason);
            }
            Event::DeliveryClaimed {
                order_id,
                courier_id,
            } => {
                info!(
                    "Delivery claimed: order_id={}, courier_id={}",
                    order_id, courier_id
                );
            }
            Event::DeliveryReleased {
                order_id,
                courier_id,
                reason,
            } => {
                info!(
                    "Delivery released: order_id={}, courier_id={}, reason={}",
                    order_id, courier_id, reason
                );
            }
            Event::DeliveryReassigned {
                order_id,
                new_courier_id,
            } => {
                info!(
                    "Delivery reassigned: order_id={}, new_courier_id={}",
                    order_id, new_courier_id
                );
            }
            Event::CartItemAdded {
                customer_id,
                listing_id,
                quantity,
            } => {
                info!(
                    "Cart item added: customer_id={}, listing_id={}, quantity={}",
                    customer_id, listing_id, quantity
                );
            }
            Event::CartItemRemoved {
                customer_id,
                listing_id,
            } => {
                info!(
                    "Cart item removed: customer_id={}, listing_id={}",
                    customer_id, listing_id
                );
            }
            Event::CartMerchantReplaced {
                customer_id,
                old_merchant_id,
                new_merchant_id,
            } => {
                info!(
                    "Cart switched merchant: customer_id={}, {} -> {}",
                    customer_id, old_merchant_id, new_merchant_id
                );
            }
            Event::CartCleared(customer_id) => {
                info!("Cart cleared: customer_id={}", customer_id);
            }
            Event::TrackingEnded(order_id) => {
                info!("Tracking ended: order_id={}", order_id);
            }
        }
    }

    warn!("Event processing loop stopped: all senders dropped");
}
