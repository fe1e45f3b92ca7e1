//! The `registry` module owns the mapping from topic name to subscribed
//! connections and the lifecycle of the matching broker subscriptions.

pub mod topic;
pub mod topic_registry;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::broker::bridge::CommandSender;

pub use topic::Topic;
pub use topic_registry::{RESERVED_PREFIX, TopicRegistry, validate_topic};

/// The registry as shared between connections and the fan-out task.
///
/// Never hold the guard across an `.await`.
#[derive(Debug, Clone)]
pub struct SharedRegistry(Arc<Mutex<TopicRegistry>>);

impl SharedRegistry {
    pub fn new(broker: CommandSender) -> Self {
        Self(Arc::new(Mutex::new(TopicRegistry::new(broker))))
    }

    pub fn lock(&self) -> MutexGuard<'_, TopicRegistry> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
