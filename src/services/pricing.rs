use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::entities::DeliveryType;
use crate::services::catalog::MerchantProfile;

/// Fully priced checkout quote. Amounts are captured onto the order at
/// placement and never recomputed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PriceQuote {
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub service_fee: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// Computes order totals from current catalog prices and platform rates.
#[derive(Clone)]
pub struct PricingCalculator {
    service_fee_rate: Decimal,
    tax_rate: Decimal,
}

impl PricingCalculator {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self {
            service_fee_rate: Decimal::from_f64_retain(config.service_fee_rate)
                .unwrap_or_default(),
            tax_rate: Decimal::from_f64_retain(config.default_tax_rate).unwrap_or_default(),
        }
    }

    /// Prices a checkout. The delivery fee comes from the merchant profile
    /// and is waived entirely for pickup orders.
    pub fn quote(
        &self,
        subtotal: Decimal,
        merchant: &MerchantProfile,
        delivery_type: DeliveryType,
    ) -> PriceQuote {
        let delivery_fee = match delivery_type {
            DeliveryType::Courier => merchant.delivery_fee,
            DeliveryType::Pickup => Decimal::ZERO,
        };
        let service_fee = (subtotal * self.service_fee_rate).round_dp(2);
        let tax = (subtotal * self.tax_rate).round_dp(2);
        let total = subtotal + delivery_fee + service_fee + tax;

        PriceQuote {
            subtotal,
            delivery_fee,
            service_fee,
            tax,
            total,
        }
    }
}
