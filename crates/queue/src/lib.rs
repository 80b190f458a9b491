//! Redis-backed delivery for haggle.
//!
//! Offline notifications are published on a Redis channel for live
//! consumers and pushed onto a Redis list for the notification workers.

pub mod pubsub;

pub use pubsub::{NotificationEnvelope, RedisNotificationSink, channel_names};
