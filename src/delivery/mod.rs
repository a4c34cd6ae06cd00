pub mod models;
pub mod reconciler;

pub use models::{CreateDeliveryRequest, DeliveryPatch, DeliveryView};
pub use reconciler::DeliveryReconciler;
