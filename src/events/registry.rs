//! Live subscription registry.
//!
//! Subscriptions are held in a primary map keyed by id and a secondary index
//! keyed by user. Both maps sit behind one `RwLock` and every mutation updates
//! them together, so a subscription is visible through `get` exactly when it
//! is visible through `list_by_user`.
//!
//! Each subscription owns the sending half of a bounded channel; the caller of
//! [`SubscriptionRegistry::create`] keeps the receiver.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use super::types::{CreateSubscriptionRequest, Subscription, SubscriptionPatch, TaskEvent};
use crate::board::store::{ProjectStore, UserStore};
use crate::config::SubscriptionSettings;
use crate::errors::BoardError;

/// Receiving half of a subscription's delivery channel.
pub type EventReceiver = mpsc::Receiver<Arc<TaskEvent>>;
pub type EventSender = mpsc::Sender<Arc<TaskEvent>>;

/// A freshly created subscription and its event stream.
#[derive(Debug)]
pub struct SubscriptionHandle {
    pub subscription: Subscription,
    pub events: EventReceiver,
}

struct Entry {
    subscription: Subscription,
    /// Dropped when the subscription is deactivated, closing the receiver.
    sender: Option<EventSender>,
}

#[derive(Default)]
struct RegistryState {
    by_id: HashMap<String, Entry>,
    by_user: HashMap<String, HashSet<String>>,
}

impl RegistryState {
    fn insert(&mut self, entry: Entry) {
        let id = entry.subscription.id.clone();
        self.by_user
            .entry(entry.subscription.user_id.clone())
            .or_default()
            .insert(id.clone());
        self.by_id.insert(id, entry);
    }

    fn remove(&mut self, id: &str) -> Option<Entry> {
        let entry = self.by_id.remove(id)?;
        let user_id = &entry.subscription.user_id;
        if let Some(ids) = self.by_user.get_mut(user_id) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_user.remove(user_id);
            }
        }
        Some(entry)
    }

    fn active_count_for(&self, user_id: &str) -> usize {
        self.by_user.get(user_id).map_or(0, |ids| {
            ids.iter()
                .filter_map(|id| self.by_id.get(id))
                .filter(|e| e.subscription.active)
                .count()
        })
    }
}

/// A subscription selected for delivery.
pub struct Match {
    pub id: String,
    pub sender: EventSender,
}

pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
    users: Arc<dyn UserStore>,
    projects: Arc<dyn ProjectStore>,
    settings: SubscriptionSettings,
}

impl SubscriptionRegistry {
    pub fn new(
        users: Arc<dyn UserStore>,
        projects: Arc<dyn ProjectStore>,
        settings: SubscriptionSettings,
    ) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            users,
            projects,
            settings,
        }
    }

    pub fn settings(&self) -> &SubscriptionSettings {
        &self.settings
    }

    pub async fn create(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<SubscriptionHandle, BoardError> {
        if request.event_types.is_empty() {
            return Err(BoardError::validation(
                "subscription needs at least one event type",
            ));
        }
        if request.user_id.trim().is_empty() {
            return Err(BoardError::validation("user id is required"));
        }
        if !self.users.exists(&request.user_id).await? {
            return Err(BoardError::UserNotFound {
                id: request.user_id,
            });
        }
        if let Some(project_id) = &request.project_id {
            let project = self.projects.get_by_id(project_id).await?.ok_or_else(|| {
                BoardError::ProjectNotFound {
                    id: project_id.clone(),
                }
            })?;
            if !project.has_access(&request.user_id) {
                return Err(BoardError::AccessDenied {
                    user_id: request.user_id,
                    project_id: project_id.clone(),
                });
            }
        }

        let (sender, events) = mpsc::channel(self.settings.channel_capacity.max(1));
        let subscription = Subscription {
            id: Uuid::new_v4().to_string(),
            user_id: request.user_id,
            project_id: request.project_id,
            event_types: request.event_types.into_iter().collect(),
            filters: request.filters,
            active: true,
            created_at: Utc::now(),
            last_activity: None,
        };

        let mut state = self.state.write().await;
        // Counted under the write lock so concurrent creates cannot overshoot.
        if state.active_count_for(&subscription.user_id) >= self.settings.max_per_user {
            return Err(BoardError::SubscriptionLimit {
                user_id: subscription.user_id,
                limit: self.settings.max_per_user,
            });
        }
        state.insert(Entry {
            subscription: subscription.clone(),
            sender: Some(sender),
        });
        drop(state);

        tracing::debug!(
            subscription_id = %subscription.id,
            user_id = %subscription.user_id,
            project_id = ?subscription.project_id,
            "Created subscription"
        );
        Ok(SubscriptionHandle {
            subscription,
            events,
        })
    }

    pub async fn get(&self, id: &str) -> Result<Subscription, BoardError> {
        self.state
            .read()
            .await
            .by_id
            .get(id)
            .map(|e| e.subscription.clone())
            .ok_or_else(|| BoardError::SubscriptionNotFound { id: id.to_string() })
    }

    /// A user's subscriptions, oldest first.
    pub async fn list_by_user(&self, user_id: &str) -> Vec<Subscription> {
        let state = self.state.read().await;
        let mut subs: Vec<Subscription> = state
            .by_user
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.by_id.get(id))
            .map(|e| e.subscription.clone())
            .collect();
        subs.sort_by_key(|s| s.created_at);
        subs
    }

    pub async fn update(
        &self,
        id: &str,
        patch: SubscriptionPatch,
    ) -> Result<Subscription, BoardError> {
        if patch.event_types.as_ref().is_some_and(|t| t.is_empty()) {
            return Err(BoardError::validation(
                "subscription needs at least one event type",
            ));
        }
        let mut state = self.state.write().await;
        let entry = state
            .by_id
            .get_mut(id)
            .ok_or_else(|| BoardError::SubscriptionNotFound { id: id.to_string() })?;
        // A closed channel cannot be reopened.
        if patch.active == Some(true) && entry.sender.is_none() {
            return Err(BoardError::validation(
                "subscription channel is closed; create a new subscription",
            ));
        }
        if let Some(types) = patch.event_types {
            entry.subscription.event_types = types.into_iter().collect();
        }
        if let Some(filters) = patch.filters {
            entry.subscription.filters = filters;
        }
        if let Some(active) = patch.active {
            entry.subscription.active = active;
        }
        Ok(entry.subscription.clone())
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub async fn delete(&self, id: &str) -> bool {
        let removed = self.state.write().await.remove(id).is_some();
        if removed {
            tracing::debug!(subscription_id = %id, "Deleted subscription");
        }
        removed
    }

    /// Drop inactive subscriptions and those idle longer than the timeout.
    /// Returns how many were removed.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let timeout = chrono::Duration::from_std(self.settings.timeout())
            .unwrap_or(chrono::Duration::MAX);
        let mut state = self.state.write().await;
        let expired: Vec<String> = state
            .by_id
            .values()
            .filter(|e| {
                !e.subscription.active
                    || now.signed_duration_since(e.subscription.last_seen()) > timeout
            })
            .map(|e| e.subscription.id.clone())
            .collect();
        for id in &expired {
            state.remove(id);
        }
        drop(state);

        if !expired.is_empty() {
            tracing::info!(removed = expired.len(), "Cleaned up stale subscriptions");
        }
        expired.len()
    }

    /// Active subscriptions that want `event`, with their senders.
    ///
    /// Unscoped subscriptions only see projects their owner can access; the
    /// event's project is looked up once per call, and only if needed.
    pub async fn matching(&self, event: &TaskEvent) -> Vec<Match> {
        let candidates: Vec<(Match, Option<String>)> = {
            let state = self.state.read().await;
            state
                .by_id
                .values()
                .filter(|e| e.subscription.matches(event))
                .filter_map(|e| {
                    let unscoped_owner = e
                        .subscription
                        .project_id
                        .is_none()
                        .then(|| e.subscription.user_id.clone());
                    e.sender.as_ref().map(|sender| {
                        let found = Match {
                            id: e.subscription.id.clone(),
                            sender: sender.clone(),
                        };
                        (found, unscoped_owner)
                    })
                })
                .collect()
        };

        if candidates.iter().all(|(_, owner)| owner.is_none()) {
            return candidates.into_iter().map(|(m, _)| m).collect();
        }

        let project = match self.projects.get_by_id(&event.project_id).await {
            Ok(project) => project,
            Err(e) => {
                tracing::warn!(
                    project_id = %event.project_id,
                    error = %e,
                    "Project lookup failed; skipping unscoped subscriptions"
                );
                None
            }
        };
        candidates
            .into_iter()
            .filter(|(_, owner)| match owner {
                None => true,
                Some(user_id) => project.as_ref().is_some_and(|p| p.has_access(user_id)),
            })
            .map(|(m, _)| m)
            .collect()
    }

    /// Record a delivery.
    pub async fn touch(&self, ids: &[String], at: DateTime<Utc>) {
        if ids.is_empty() {
            return;
        }
        let mut state = self.state.write().await;
        for id in ids {
            if let Some(entry) = state.by_id.get_mut(id) {
                entry.subscription.last_activity = Some(at);
            }
        }
    }

    /// Mark a subscription inactive and close its channel. Missing ids are
    /// ignored: the subscriber may have unsubscribed in the meantime.
    pub async fn deactivate(&self, id: &str) {
        let mut state = self.state.write().await;
        if let Some(entry) = state.by_id.get_mut(id) {
            entry.subscription.active = false;
            entry.sender = None;
        }
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether the id index and the per-user index describe the same set.
    pub async fn is_consistent(&self) -> bool {
        let state = self.state.read().await;
        let indexed: usize = state.by_user.values().map(HashSet::len).sum();
        indexed == state.by_id.len()
            && state.by_user.iter().all(|(user, ids)| {
                !ids.is_empty()
                    && ids.iter().all(|id| {
                        state
                            .by_id
                            .get(id)
                            .is_some_and(|e| &e.subscription.user_id == user)
                    })
            })
    }
}
