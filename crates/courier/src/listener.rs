//! Listeners and their handler tables.
//!
//! A listener tells the bus which message ids it handles by returning a
//! [`HandlerTable`]: an explicit `{id → handler}` list built with a small
//! builder. There's no discovery at runtime; whatever is in the table is
//! what gets registered.
//!
//! Every handler has the same shape, `(&Payload) -> Result<(), ListenerError>`,
//! and the compiler enforces it, so a wrongly shaped handler can't reach
//! the registry.

use std::sync::Arc;

use courier_protocol::Payload;
use serde::de::DeserializeOwned;

use crate::ListenerError;

/// A handler callable, shared between the registry and the dispatcher.
pub type Handler = Arc<dyn Fn(&Payload) -> Result<(), ListenerError> + Send + Sync>;

/// A type whose instances handle incoming messages.
///
/// Implementors return a table binding each message id to one of their
/// methods. The `Arc<Self>` receiver lets each handler keep the instance
/// alive for as long as the bus holds the registration.
///
/// ```rust
/// use std::sync::{Arc, Mutex};
/// use courier::{HandlerTable, ListenerError, MessageListener, Payload};
///
/// #[derive(Default)]
/// struct Audit {
///     seen: Mutex<Vec<Payload>>,
/// }
///
/// impl Audit {
///     fn on_order(&self, payload: &Payload) -> Result<(), ListenerError> {
///         self.seen.lock().unwrap().push(payload.clone());
///         Ok(())
///     }
/// }
///
/// impl MessageListener for Audit {
///     fn handlers(self: Arc<Self>) -> HandlerTable {
///         HandlerTable::for_owner::<Self>()
///             .method("order.created", &self, Audit::on_order)
///             .method("order.cancelled", &self, Audit::on_order)
///     }
/// }
///
/// let table = Arc::new(Audit::default()).handlers();
/// assert_eq!(table.len(), 2);
/// ```
pub trait MessageListener: Send + Sync + 'static {
    /// Returns the handlers this instance wants registered.
    fn handlers(self: Arc<Self>) -> HandlerTable;
}

/// One `(id, handler)` row of a [`HandlerTable`].
pub(crate) struct HandlerEntry {
    pub(crate) id: String,
    pub(crate) handler: Handler,
}

/// An explicit list of `(message id, handler)` pairs.
///
/// Ids are NOT validated while the table is built; the bus validates the
/// whole table when it is registered and rejects it as a unit.
pub struct HandlerTable {
    owner: &'static str,
    entries: Vec<HandlerEntry>,
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerTable {
    /// Creates an empty table for free-standing closures.
    pub fn new() -> Self {
        Self::named("anonymous")
    }

    /// Creates an empty table labelled with the owner's type name.
    pub fn for_owner<L: ?Sized>() -> Self {
        Self::named(short_type_name(std::any::type_name::<L>()))
    }

    /// Creates an empty table with an explicit owner label.
    pub fn named(owner: &'static str) -> Self {
        Self {
            owner,
            entries: Vec::new(),
        }
    }

    /// Adds a handler closure for `id`.
    pub fn on<F>(mut self, id: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Payload) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.entries.push(HandlerEntry {
            id: id.into(),
            handler: Arc::new(handler),
        });
        self
    }

    /// Adds a method of `owner` as the handler for `id`.
    ///
    /// The handler keeps its own `Arc` to `owner`, so calls always reach
    /// the same instance's state.
    pub fn method<L, F>(self, id: impl Into<String>, owner: &Arc<L>, method: F) -> Self
    where
        L: Send + Sync + 'static,
        F: Fn(&L, &Payload) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let owner = Arc::clone(owner);
        self.on(id, move |payload| method(&owner, payload))
    }

    /// Adds a handler that receives the payload decoded into `T`.
    ///
    /// A payload that doesn't match `T` counts as a listener failure for
    /// this handler only.
    pub fn typed<T, F>(self, id: impl Into<String>, handler: F) -> Self
    where
        T: DeserializeOwned,
        F: Fn(T) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.on(id, move |payload| handler(payload.decode::<T>()?))
    }

    pub fn owner(&self) -> &'static str {
        self.owner
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The ids in this table, in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.id.as_str())
    }

    pub(crate) fn into_entries(self) -> (&'static str, Vec<HandlerEntry>) {
        (self.owner, self.entries)
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("owner", &self.owner)
            .field("ids", &self.ids().collect::<Vec<_>>())
            .finish()
    }
}

/// `my_app::billing::Billing` → `Billing`.
fn short_type_name(full: &'static str) -> &'static str {
    // Generic arguments can contain `::` too, so only look before `<`.
    let head = full.split('<').next().unwrap_or(full);
    match head.rfind("::") {
        Some(idx) => &full[idx + 2..],
        None => full,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde::Deserialize;

    use super::*;

    struct Counter {
        hits: Mutex<u32>,
    }

    impl Counter {
        fn hit(&self, _payload: &Payload) -> Result<(), ListenerError> {
            *self.hits.lock().unwrap() += 1;
            Ok(())
        }
    }

    impl MessageListener for Counter {
        fn handlers(self: Arc<Self>) -> HandlerTable {
            HandlerTable::for_owner::<Self>()
                .method("a", &self, Counter::hit)
                .method("b", &self, Counter::hit)
        }
    }

    #[test]
    fn test_method_handlers_share_the_instance() {
        let counter = Arc::new(Counter { hits: Mutex::new(0) });
        let (owner, entries) = Arc::clone(&counter).handlers().into_entries();
        assert_eq!(owner, "Counter");

        for entry in &entries {
            (entry.handler)(&Payload::new()).unwrap();
        }
        assert_eq!(*counter.hits.lock().unwrap(), 2);
    }

    #[test]
    fn test_ids_keep_insertion_order() {
        let table = HandlerTable::new()
            .on("z", |_| Ok(()))
            .on("a", |_| Ok(()))
            .on("z", |_| Ok(()));
        assert_eq!(table.ids().collect::<Vec<_>>(), vec!["z", "a", "z"]);
        assert_eq!(table.owner(), "anonymous");
    }

    #[test]
    fn test_typed_handler_decodes_payload() {
        #[derive(Deserialize)]
        struct Ping {
            n: u32,
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let table = HandlerTable::new().typed("ping", move |ping: Ping| {
            sink.lock().unwrap().push(ping.n);
            Ok(())
        });
        let (_, entries) = table.into_entries();

        (entries[0].handler)(&Payload::new().with("n", 5)).unwrap();
        assert!((entries[0].handler)(&Payload::new().with("n", "five")).is_err());
        assert_eq!(*seen.lock().unwrap(), vec![5]);
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name("a::b::Billing"), "Billing");
        assert_eq!(short_type_name("Billing"), "Billing");
        assert_eq!(short_type_name("a::Wrapper<b::Inner>"), "Wrapper<b::Inner>");
    }
}
