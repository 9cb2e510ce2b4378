pub mod producer;
pub mod router;

pub use router::{DeliveryResult, DeliveryStats, Router, Target};
