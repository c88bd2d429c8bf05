pub mod carts;
pub mod checkout;
pub mod deliveries;
pub mod orders;
pub mod tracking;

use crate::config::AppConfig;
use crate::events::EventSender;
use crate::services::{
    assignment::AssignmentService,
    carts::CartService,
    catalog::{Catalog, MerchantDirectory, SqlCatalog, SqlMerchantDirectory},
    checkout::CheckoutService,
    orders::OrderService,
    pricing::PricingCalculator,
    realtime::RealtimeService,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub carts: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub assignment: Arc<AssignmentService>,
    pub realtime: Arc<RealtimeService>,
}

impl AppServices {
    /// Build the AppServices container over one shared database handle.
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        let catalog: Arc<dyn Catalog> = Arc::new(SqlCatalog::new(db.clone()));
        let merchants: Arc<dyn MerchantDirectory> = Arc::new(SqlMerchantDirectory::new(db.clone()));
        let pricing = PricingCalculator::new(config.clone());
        let realtime = Arc::new(RealtimeService::new(db.clone(), &config));

        let carts = Arc::new(CartService::new(
            db.clone(),
            event_sender.clone(),
            catalog.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            event_sender.clone(),
            pricing,
            catalog,
            merchants.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            db.clone(),
            event_sender.clone(),
            realtime.clone(),
            config.clone(),
        ));
        let assignment = Arc::new(AssignmentService::new(
            db,
            event_sender,
            realtime.clone(),
            merchants,
            config,
        ));

        Self {
            carts,
            checkout,
            orders,
            assignment,
            realtime,
        }
    }
}
