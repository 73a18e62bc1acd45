//! Clients for the broker (Rupeezy Vortex) and the signal feed (Chartink).

mod chartink_client;
mod gateway;
mod types;
mod vortex_client;

pub use chartink_client::ChartinkClient;
pub use gateway::{Broker, SignalFeed};
pub use vortex_client::VortexClient;
