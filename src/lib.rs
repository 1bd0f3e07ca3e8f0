pub mod config;
pub mod error;
pub mod kernel;
pub mod orchestrator;
pub mod services;
pub mod store;

pub use kernel::connection::ConnectionManager;
pub use kernel::notification::{Notification, NotificationKind};
pub use orchestrator::{Orchestrator, UiEvent};
