//! The component broker: a registry of singleton service interfaces keyed by
//! interface type and an optional name, with reference-counted acquisition.
//!
//! Modules publish an `Arc<dyn Interface>` under the interface's type
//! identity and resolve peers the same way; unpublishing is refused while
//! any acquired handle is still alive.

use std::any::{Any, TypeId};
use std::ops::Deref;

use kstring::KString;
use thiserror::Error;

use crate::prelude::*;

#[derive(Clone, Eq, PartialEq, Hash)]
struct BrokerKey {
    iface: TypeId,
    name: Option<KString>,
}

struct Binding {
    /// Boxed `Arc<I>`; downcast by the typed accessors.
    object: Box<dyn Any + Send + Sync>,
    token: u64,
    users: usize,
}

#[derive(Default)]
struct BrokerInner {
    bindings: HashMap<BrokerKey, Vec<Binding>>,
    next_token: u64,
}

/// Handed back by [`ComponentBroker::register`]; required to unregister.
#[derive(Debug)]
pub struct InterfaceToken {
    iface: TypeId,
    name: Option<KString>,
    token: u64,
}

/// Errors from broker registration maintenance.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum BrokerError {
    /// The binding is still acquired by this many holders.
    #[error("interface still held by {0} user(s)")]
    StillInUse(usize),
    /// The token does not match any live binding (already unregistered).
    #[error("no registration matches the token")]
    UnknownToken,
}

/// A refcounted, acquired interface. Dropping the handle releases the
/// reference and allows the binding to be unregistered again.
pub struct InterfaceHandle<I: ?Sized> {
    object: Arc<I>,
    broker: Arc<ComponentBroker>,
    key: BrokerKey,
    token: u64,
}

impl<I: ?Sized> Deref for InterfaceHandle<I> {
    type Target = I;

    fn deref(&self) -> &I {
        &self.object
    }
}

impl<I: ?Sized> InterfaceHandle<I> {
    /// The shared implementation object itself.
    pub fn object(&self) -> &Arc<I> {
        &self.object
    }
}

impl<I: ?Sized> Drop for InterfaceHandle<I> {
    fn drop(&mut self) {
        let mut inner = self.broker.inner.lock().unwrap();
        if let Some(list) = inner.bindings.get_mut(&self.key) {
            if let Some(binding) = list.iter_mut().find(|b| b.token == self.token) {
                binding.users = binding.users.saturating_sub(1);
            }
        }
    }
}

/// Registry of singleton service interfaces, keyed by
/// `(interface identity, optional name)`.
#[derive(Default)]
pub struct ComponentBroker {
    inner: Mutex<BrokerInner>,
}

impl ComponentBroker {
    /// Constructs an empty broker.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Publishes `implementation` under interface type `I` and the optional
    /// name. A later registration of the same `(I, name)` becomes the new
    /// default binding for unnamed lookups.
    pub fn register<I: ?Sized + Any + Send + Sync>(
        &self,
        implementation: Arc<I>,
        name: Option<&str>,
    ) -> InterfaceToken {
        let key = BrokerKey {
            iface: TypeId::of::<I>(),
            name: name.map(KString::from_ref),
        };
        let mut inner = self.inner.lock().unwrap();
        inner.next_token += 1;
        let token = inner.next_token;
        inner.bindings.entry(key.clone()).or_default().push(Binding {
            object: Box::new(implementation),
            token,
            users: 0,
        });
        InterfaceToken {
            iface: key.iface,
            name: key.name,
            token,
        }
    }

    /// Acquires the most recently registered binding of `(I, name)`,
    /// incrementing its reference count.
    pub fn get<I: ?Sized + Any + Send + Sync>(
        self: &Arc<Self>,
        name: Option<&str>,
    ) -> Option<InterfaceHandle<I>> {
        let key = BrokerKey {
            iface: TypeId::of::<I>(),
            name: name.map(KString::from_ref),
        };
        let mut inner = self.inner.lock().unwrap();
        let binding = inner.bindings.get_mut(&key)?.last_mut()?;
        let object = binding.object.downcast_ref::<Arc<I>>()?.clone();
        binding.users += 1;
        Some(InterfaceHandle {
            object,
            broker: Arc::clone(self),
            key,
            token: binding.token,
        })
    }

    /// Removes the binding the token was issued for. Fails with the
    /// outstanding count while acquired handles exist.
    pub fn unregister(&self, token: &InterfaceToken) -> Result<(), BrokerError> {
        let key = BrokerKey {
            iface: token.iface,
            name: token.name.clone(),
        };
        let mut inner = self.inner.lock().unwrap();
        let list = inner.bindings.get_mut(&key).ok_or(BrokerError::UnknownToken)?;
        let pos = list
            .iter()
            .position(|b| b.token == token.token)
            .ok_or(BrokerError::UnknownToken)?;
        let users = list[pos].users;
        if users > 0 {
            return Err(BrokerError::StillInUse(users));
        }
        list.remove(pos);
        if list.is_empty() {
            inner.bindings.remove(&key);
        }
        Ok(())
    }
}
