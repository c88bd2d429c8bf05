pub mod cart;
pub mod cart_item;
pub mod listing;
pub mod merchant;
pub mod order;
pub mod order_item;
pub mod order_status_history;

pub use order::{DeliveryType, OrderStatus};
pub use order_status_history::ActorRole;
