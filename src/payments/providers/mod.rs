pub mod connect;
pub mod feexpay;
pub mod legacy_cashier;
pub mod platform_api;

pub use connect::{ConnectMode, ConnectProvider, ConnectProviderConfig, ConnectTokenCache};
pub use feexpay::{FeexpayProvider, FeexpayProviderConfig};
pub use legacy_cashier::LegacyCashierProvider;
pub use platform_api::{PlatformApiProvider, PlatformApiProviderConfig};
