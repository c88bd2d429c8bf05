// Core lifecycle services
pub mod carts;
pub mod checkout;
pub mod orders;

// Delivery assignment and realtime tracking
pub mod assignment;
pub mod realtime;

// Shared building blocks
pub mod catalog;
pub mod geo;
pub mod pricing;
