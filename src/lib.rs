// Caching HTTP proxy in front of the Calendarific holiday API

pub mod cache;
pub mod config;
pub mod proxy;
pub mod server;
pub mod telemetry;
pub mod upstream;

// Re-export key types for convenience
pub use cache::{CacheConfig, CacheStats, ExpiringCache, TtlCache};
pub use config::{Config, ConfigError};
pub use proxy::{HolidayProxy, ProxyError};
pub use server::{router, serve, AppState};
pub use upstream::{CalendarificClient, ClientConfig, HolidayApi, HolidayQuery, UpstreamError};
