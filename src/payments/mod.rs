//! Provider gateway layer: signatures, normalized types and the provider variants.

pub mod error;
pub mod factory;
pub mod provider;
pub mod providers;
pub mod signature;
pub mod types;
pub mod utils;
