//! Per-plugin table of local async event callbacks.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, PoisonError, RwLock},
};

use {
    futures::{
        FutureExt,
        future::{BoxFuture, join_all},
    },
    serde_json::Value,
};

use crate::event::RoomEvent;

/// A registered callback. Receives its own copy of the event payload.
pub type EventHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Default)]
pub struct EventHandlers {
    table: RwLock<HashMap<RoomEvent, Vec<EventHandler>>>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for `event`. Several callbacks may share an event.
    pub fn on<F, Fut>(&self, event: RoomEvent, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: EventHandler = Arc::new(move |data: Value| handler(data).boxed());
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event)
            .or_default()
            .push(handler);
    }

    pub fn handler_count(&self, event: RoomEvent) -> usize {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event)
            .map_or(0, Vec::len)
    }

    /// Drop every registered callback.
    pub fn clear(&self) {
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Run all callbacks for `event` concurrently and wait for every one of
    /// them. A failing callback doesn't stop its siblings; the first error is
    /// returned once all have settled.
    pub async fn dispatch(&self, event: RoomEvent, data: &Value) -> anyhow::Result<()> {
        let handlers: Vec<EventHandler> = {
            let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
            table.get(&event).cloned().unwrap_or_default()
        };
        if handlers.is_empty() {
            return Ok(());
        }

        let results = join_all(handlers.iter().map(|h| h(data.clone()))).await;
        let mut errors = results.into_iter().filter_map(Result::err);
        match errors.next() {
            None => Ok(()),
            Some(first) => match errors.count() {
                0 => Err(first),
                more => Err(first.context(format!("{more} more {event} handler(s) also failed"))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;

    #[tokio::test]
    async fn test_dispatch_runs_only_matching_handlers() {
        let handlers = EventHandlers::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let hits = Arc::clone(&hits);
            handlers.on(RoomEvent::MessageCreated, move |_| {
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }
        handlers.on(RoomEvent::RoomCreated, |_| async {
            Err::<(), _>(anyhow::anyhow!("should not run"))
        });

        handlers
            .dispatch(RoomEvent::MessageCreated, &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(handlers.handler_count(RoomEvent::MessageCreated), 2);
        assert_eq!(handlers.handler_count(RoomEvent::ParticipantLeft), 0);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_stop_siblings() {
        let handlers = EventHandlers::new();
        let finished = Arc::new(AtomicUsize::new(0));

        handlers.on(RoomEvent::MessageCreated, |_| async {
            Err::<(), _>(anyhow::anyhow!("boom"))
        });
        let slow = Arc::clone(&finished);
        handlers.on(RoomEvent::MessageCreated, move |data| {
            let slow = Arc::clone(&slow);
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                assert_eq!(data["content"], "hi");
                slow.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let err = handlers
            .dispatch(RoomEvent::MessageCreated, &serde_json::json!({"content": "hi"}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_multiple_failures_are_counted() {
        let handlers = EventHandlers::new();
        for _ in 0..3 {
            handlers.on(RoomEvent::RoomUpdated, |_| async {
                Err::<(), _>(anyhow::anyhow!("nope"))
            });
        }
        let err = handlers
            .dispatch(RoomEvent::RoomUpdated, &Value::Null)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("2 more room.updated handler(s) also failed"));
    }

    #[tokio::test]
    async fn test_clear_removes_handlers() {
        let handlers = EventHandlers::new();
        handlers.on(RoomEvent::MessageCreated, |_| async {
            Err::<(), _>(anyhow::anyhow!("x"))
        });
        handlers.clear();
        assert!(
            handlers
                .dispatch(RoomEvent::MessageCreated, &Value::Null)
                .await
                .is_ok()
        );
    }
}
