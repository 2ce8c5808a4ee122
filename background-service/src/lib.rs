pub mod budget;
pub mod notifier;
pub mod service;

pub use budget::NotificationBudget;
pub use notifier::{ConfiguredNotifier, DesktopNotifier, LogNotifier, Notifier};
pub use service::{BackgroundService, CycleReport, ServiceSettings};
