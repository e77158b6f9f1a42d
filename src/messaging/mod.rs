// Messaging - notification plumbing between threads

pub mod channels;
pub mod notification;

pub use channels::{create_notification_channel, NotificationConsumer, NotificationProducer};
pub use notification::{Notification, NotificationCategory, NotificationLevel};
