pub mod alerts;

pub use alerts::{
    load_default, load_from, AlertRules, AlertsConfig, CacheConfig, CategoryRule, FetchConfig,
    HazardConfig, ServerConfig, StreamConfig,
};
