//! Shared foundations for the nurture flow workspace: configuration, the
//! error taxonomy and the event bus used by the builder and the monitor.

pub mod config;
pub mod error;
pub mod event_bus;

pub use config::AppConfig;
pub use error::{NurtureError, NurtureResult};
pub use event_bus::{EventSink, EventType, NurtureEvent};
