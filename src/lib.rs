pub mod config;
pub mod error;
pub mod models;
pub mod pricing;
pub mod providers;
pub mod proxy;
pub mod server;
pub mod translate;
pub mod usage;

pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use pricing::{ModelPricing, PricingCache};
pub use server::{build_router, AppState};
