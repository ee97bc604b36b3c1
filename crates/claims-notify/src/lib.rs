//! Event aggregation and Teams delivery
//!
//! Normalizes internal events into the typed taxonomy, renders Adaptive
//! Cards, delivers them to stakeholder webhooks under rate-limit and
//! retry discipline, and persists an audit row per delivery.

pub mod aggregator;
pub mod audit;
pub mod card;
pub mod events;
pub mod pubsub;
pub mod sender;

pub use aggregator::EventAggregator;
pub use audit::{AuditStore, MemoryAuditStore, SqliteAuditStore};
pub use card::CardBuilder;
pub use events::{
    DeliveryReceipt, EventType, NotificationAuditRecord, NotificationPriority, StakeholderGroup,
    TeamsEvent, TeamsNotification,
};
pub use pubsub::{EventBus, NullEventBus, RedisEventBus};
pub use sender::{RateLimiter, WebhookSender};
