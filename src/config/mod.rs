//! Configuration loading and validation.

pub mod settings;

pub use settings::{
    DatabaseSettings, ExchangeSettings, GeoSettings, LimitSettings, LoggingSettings,
    NetworkSettings, NodeSettings, PortalSettings, PruneSettings, ScannerSettings, Settings,
};
