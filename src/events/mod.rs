//! Task events, subscriptions and their delivery.

pub mod dispatcher;
pub mod registry;
pub mod sink;
pub mod types;

pub use dispatcher::{DispatcherStats, EventDispatcher, EventHandler};
pub use registry::{EventReceiver, SubscriptionHandle, SubscriptionRegistry};
pub use sink::{BroadcastSink, PushEnvelope, PushScope, PushSink};
pub use types::{
    CreateSubscriptionRequest, EventData, EventType, Subscription, SubscriptionPatch, TaskEvent,
};
