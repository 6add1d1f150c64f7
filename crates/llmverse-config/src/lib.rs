pub mod loader;
pub mod model;

pub use loader::ConfigLoader;
pub use model::{
    AppConfig, DeliveryConfig, HistoryBackend, HistoryConfig, ModelSettings, ProviderKind,
};
