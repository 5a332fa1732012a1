//! # Change notification
//!
//! Every catalog change, whether a reload cycle or an admin edit, goes
//! through [`ChangeNotifier::notify`], which keeps the dependent caches,
//! the live subscribers and the version counter in step.

pub mod caches;
pub mod event;
pub mod notifier;
pub mod subscribers;

pub use caches::{AccessTierCache, CachedAccess, DependentCache, RateLimitCache, RateLimits};
pub use event::{ChangeEvent, ChangeKind, LiveMessage};
pub use notifier::{ChangeNotifier, NotifyReport};
pub use subscribers::{Delivery, SubscriberRegistry, Subscription};
