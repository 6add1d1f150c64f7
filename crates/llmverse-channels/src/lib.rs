pub mod delivery;
pub mod traits;

#[cfg(feature = "discord")]
pub mod discord;

pub use delivery::{ChunkedDeliveryAdapter, DeliveryReport, DeliverySettings};
pub use traits::DeliverySurface;

#[cfg(feature = "discord")]
pub use discord::{DiscordChannel, DiscordConfig};
