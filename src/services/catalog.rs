use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, EntityTrait};
use uuid::Uuid;

use crate::entities::{listing, merchant};
use crate::errors::ServiceError;
use crate::services::geo::GeoPoint;

/// A catalog listing as seen by cart validation and checkout re-pricing.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingInfo {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub is_available: bool,
}

impl From<listing::Model> for ListingInfo {
    fn from(model: listing::Model) -> Self {
        Self {
            id: model.id,
            merchant_id: model.merchant_id,
            name: model.name,
            price: model.price,
            is_available: model.is_available,
        }
    }
}

/// The merchant profile fields the engine needs: fees, the order floor and
/// the pickup point for courier proximity.
#[derive(Debug, Clone, PartialEq)]
pub struct MerchantProfile {
    pub id: Uuid,
    pub name: String,
    pub delivery_fee: Decimal,
    pub minimum_order: Decimal,
    pub pickup: GeoPoint,
}

impl From<merchant::Model> for MerchantProfile {
    fn from(model: merchant::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            delivery_fee: model.delivery_fee,
            minimum_order: model.minimum_order,
            pickup: GeoPoint::new(model.pickup_lat, model.pickup_lng),
        }
    }
}

/// Read seam over the listing catalog. The catalog is owned by another
/// system; this service only ever looks rows up.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn listing(&self, id: Uuid) -> Result<Option<ListingInfo>, ServiceError>;
}

/// Read seam over merchant profiles.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MerchantDirectory: Send + Sync {
    async fn merchant(&self, id: Uuid) -> Result<Option<MerchantProfile>, ServiceError>;
}

/// Catalog backed by the locally replicated `listings` table.
pub struct SqlCatalog {
    db: Arc<DatabaseConnection>,
}

impl SqlCatalog {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Catalog for SqlCatalog {
    async fn listing(&self, id: Uuid) -> Result<Option<ListingInfo>, ServiceError> {
        let found = listing::Entity::find_by_id(id).one(&*self.db).await?;
        Ok(found.map(ListingInfo::from))
    }
}

/// Merchant directory backed by the replicated `merchants` table.
pub struct SqlMerchantDirectory {
    db: Arc<DatabaseConnection>,
}

impl SqlMerchantDirectory {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MerchantDirectory for SqlMerchantDirectory {
    async fn merchant(&self, id: Uuid) -> Result<Option<MerchantProfile>, ServiceError> {
        let found = merchant::Entity::find_by_id(id).one(&*self.db).await?;
        Ok(found.map(MerchantProfile::from))
    }
}
