//! Client event bus

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::debug;
use turnstile_api::{AnalyticsEvent, ClientEvent, EventParams};

/// Something that reacts to client events
#[async_trait]
pub trait ClientEventListener: Send + Sync {
    async fn on_client_event(&self, event: &ClientEvent);
}

/// Most recent events kept for [`ClientEventManager::logged_events`]
pub const LOGGED_EVENT_HISTORY: usize = 256;

/// Fans client events out to registered listeners.
///
/// Listeners are held weakly; a dropped manager simply stops receiving.
#[derive(Default)]
pub struct ClientEventManager {
    listeners: Mutex<Vec<Weak<dyn ClientEventListener>>>,
    logged: Mutex<VecDeque<ClientEvent>>,
}

impl ClientEventManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: &Arc<dyn ClientEventListener>) {
        self.listeners().push(Arc::downgrade(listener));
    }

    /// Deliver `event` to every live listener, in registration order
    pub async fn log_event(&self, event: ClientEvent) {
        debug!(event = ?event.event_type, originator = ?event.event_originator, "Client event");
        {
            let mut logged = lock(&self.logged);
            if logged.len() == LOGGED_EVENT_HISTORY {
                logged.pop_front();
            }
            logged.push_back(event.clone());
        }

        let listeners: Vec<Arc<dyn ClientEventListener>> = {
            let mut listeners = self.listeners();
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };

        for listener in listeners {
            listener.on_client_event(&event).await;
        }
    }

    /// Log an event originating from this library
    pub async fn log_swg_event(
        &self,
        event_type: AnalyticsEvent,
        is_from_user_action: bool,
        params: Option<EventParams>,
    ) {
        let mut event = ClientEvent::swg(event_type);
        event.is_from_user_action = is_from_user_action;
        event.additional_parameters = params;
        self.log_event(event).await;
    }

    /// The most recent events, oldest first
    pub fn logged_events(&self) -> Vec<ClientEvent> {
        lock(&self.logged).iter().cloned().collect()
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<Weak<dyn ClientEventListener>>> {
        lock(&self.listeners)
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
