pub mod catalog;
pub mod identity;
pub mod inventory;
pub mod reconcile;
pub mod render;
