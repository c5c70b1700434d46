pub mod api;
pub mod control;
pub mod dispatcher;
pub mod engine;
pub mod events;
pub mod history;
pub mod host;
pub mod link;
pub mod poller;
pub mod settings;
mod state;
pub mod transport;

#[cfg(test)]
mod test_utils;

pub use api::ApiClient;
pub use engine::{DeliveryEngine, EngineOptions};
pub use host::Host;
pub use settings::{Settings, SettingsStore};
pub use transport::{HttpOutcome, HttpRequest, HttpTransport, Method, ReqwestTransport};
