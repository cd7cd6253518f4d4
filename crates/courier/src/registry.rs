//! The listener registry: message id → ordered list of registrations.
//!
//! # Concurrency note
//!
//! The registry is read on every inbound message (by the subscription
//! task) and written rarely (by `register` calls, which may happen after
//! the subscription started). It sits behind a `std::sync::RwLock`:
//! many concurrent readers, one writer at a time. The lock is only held
//! long enough to clone the matching `Arc` handlers out; listeners run
//! with the lock released, so a slow listener never blocks registration.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use courier_protocol::MessageId;

use crate::CourierError;
use crate::listener::{Handler, HandlerTable};

/// One handler bound to one message id.
#[derive(Clone)]
pub struct Registration {
    id: MessageId,
    owner: &'static str,
    handler: Handler,
}

impl Registration {
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Type name of the listener that registered this handler.
    pub fn owner(&self) -> &'static str {
        self.owner
    }

    pub(crate) fn handler(&self) -> &Handler {
        &self.handler
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Maps message ids to the registrations listening for them.
///
/// Registrations for one id are kept in insertion order, which is the
/// order they are invoked in. There is no unregister: registrations live
/// as long as the registry.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<HashMap<MessageId, Vec<Registration>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds every handler in `table`, all or nothing.
    ///
    /// Every id is validated before the registry is touched, and all rows
    /// are inserted under one write lock, so a dispatch never observes a
    /// half-registered table.
    ///
    /// # Errors
    /// Returns [`CourierError::Configuration`] if any id is empty or
    /// contains `;`. Nothing is registered in that case.
    pub fn register(&self, table: HandlerTable) -> Result<usize, CourierError> {
        let (owner, entries) = table.into_entries();

        let mut validated = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = MessageId::new(entry.id).map_err(|e| {
                CourierError::Configuration(format!("listener {owner}: {e}"))
            })?;
            validated.push(Registration {
                id,
                owner,
                handler: entry.handler,
            });
        }

        let added = validated.len();
        {
            let mut listeners = self.write();
            for registration in validated {
                listeners
                    .entry(registration.id.clone())
                    .or_default()
                    .push(registration);
            }
        }

        tracing::debug!(owner, handlers = added, "listener registered");
        Ok(added)
    }

    /// Returns the registrations for `id`, in invocation order.
    ///
    /// Returns an empty `Vec` for unknown ids. The result is a snapshot:
    /// registrations added afterwards aren't in it.
    pub fn lookup(&self, id: &str) -> Vec<Registration> {
        self.read().get(id).cloned().unwrap_or_default()
    }

    /// Returns `true` if at least one handler listens for `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    /// Number of handlers registered for `id`.
    pub fn listener_count(&self, id: &str) -> usize {
        self.read().get(id).map_or(0, Vec::len)
    }

    /// Total number of registrations across all ids.
    pub fn len(&self) -> usize {
        self.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// All ids with at least one registration, sorted.
    pub fn ids(&self) -> Vec<MessageId> {
        let mut ids: Vec<_> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    // A listener panicking can't poison the lock (listeners run outside
    // it), so a poisoned lock still holds a consistent map.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<MessageId, Vec<Registration>>> {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<MessageId, Vec<Registration>>> {
        self.listeners.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use courier_protocol::Payload;

    use super::*;

    fn noop_table(ids: &[&str]) -> HandlerTable {
        ids.iter()
            .fold(HandlerTable::named("Noop"), |table, id| table.on(*id, |_| Ok(())))
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ListenerRegistry::new();
        let added = registry.register(noop_table(&["ping", "pong"])).unwrap();

        assert_eq!(added, 2);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.listener_count("ping"), 1);
        assert_eq!(registry.lookup("pong")[0].owner(), "Noop");
        assert!(registry.lookup("unknown").is_empty());
    }

    #[test]
    fn test_lookup_preserves_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let registry = ListenerRegistry::new();
        for name in ["A", "B", "C"] {
            let order = Arc::clone(&order);
            registry
                .register(HandlerTable::named(name).on("evt", move |_| {
                    order.lock().unwrap().push(name);
                    Ok(())
                }))
                .unwrap();
        }

        for registration in registry.lookup("evt") {
            (registration.handler())(&Payload::new()).unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_invalid_id_rejects_whole_table() {
        let registry = ListenerRegistry::new();
        let result = registry.register(noop_table(&["good", "bad;id", "also.good"]));

        assert!(matches!(result, Err(CourierError::Configuration(_))));
        assert!(registry.is_empty());
        assert!(!registry.contains("good"));
    }

    #[test]
    fn test_empty_id_is_rejected() {
        let registry = ListenerRegistry::new();
        assert!(registry.register(noop_table(&[""])).is_err());
    }

    #[test]
    fn test_empty_table_registers_nothing() {
        let registry = ListenerRegistry::new();
        assert_eq!(registry.register(HandlerTable::new()).unwrap(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_ids_are_sorted() {
        let registry = ListenerRegistry::new();
        registry.register(noop_table(&["b", "a", "b"])).unwrap();
        let ids: Vec<_> = registry.ids().into_iter().map(MessageId::into_inner).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(registry.listener_count("b"), 2);
    }

    #[test]
    fn test_concurrent_registration_and_lookup() {
        let registry = Arc::new(ListenerRegistry::new());
        let writers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        registry.register(noop_table(&["evt"])).unwrap();
                        let _ = registry.lookup("evt");
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        assert_eq!(registry.listener_count("evt"), 200);
    }
}
