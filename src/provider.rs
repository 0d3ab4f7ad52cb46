//! Provider - Context lookup for the global store
//!
//! A [`GlobalProvider`] mounts a store as the current context for the thread.
//! Components reach it through the accessor functions instead of having the
//! store passed down to them:
//!
//! - [`use_global`] - value plus setter for one field
//! - [`use_get_global`] - point reader that sees writes before they flush
//!
//! Outside a provider the accessors degrade to `None` instead of panicking.
//!
//! # Example
//!
//! ```ignore
//! use global_bus::{field, use_global, use_get_global, GlobalProvider, GlobalState, GlobalStore};
//!
//! let _root = GlobalProvider::mount(GlobalStore::new(GlobalState::default()));
//!
//! let (busy, set_busy) = use_global::<field::RemoteBusy>();
//! if let Some(set_busy) = set_busy {
//!     set_busy.set(true);
//! }
//!
//! // Visible right away, before the flush.
//! assert_eq!(use_get_global().get::<field::RemoteBusy>(), Some(true));
//! ```

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::BusError;
use crate::fields::Field;
use crate::store::GlobalStore;

thread_local! {
    /// Mounted stores, innermost last.
    static PROVIDER_STACK: RefCell<Vec<Rc<GlobalStore>>> = RefCell::new(Vec::new());
}

// =============================================================================
// PROVIDER
// =============================================================================

/// Mounts stores as the thread's current context.
pub struct GlobalProvider;

impl GlobalProvider {
    /// Mount `store`. It stays current until the guard drops or another
    /// provider is mounted inside it.
    pub fn mount(store: GlobalStore) -> ProviderGuard {
        Self::mount_shared(Rc::new(store))
    }

    pub fn mount_shared(store: Rc<GlobalStore>) -> ProviderGuard {
        let depth = PROVIDER_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(Rc::clone(&store));
            stack.len()
        });
        tracing::debug!(depth, "global provider mounted");
        ProviderGuard { store }
    }
}

/// Unmounts its store on drop.
pub struct ProviderGuard {
    store: Rc<GlobalStore>,
}

impl ProviderGuard {
    pub fn store(&self) -> &Rc<GlobalStore> {
        &self.store
    }
}

impl Drop for ProviderGuard {
    fn drop(&mut self) {
        PROVIDER_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            // Guards normally drop innermost-first, but tolerate any order.
            if let Some(pos) = stack.iter().rposition(|s| Rc::ptr_eq(s, &self.store)) {
                stack.remove(pos);
            }
        });
        tracing::debug!("global provider unmounted");
    }
}

/// The innermost mounted store, if any.
pub fn current_store() -> Option<Rc<GlobalStore>> {
    PROVIDER_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Drop every mounted store (for testing).
pub fn reset_providers() {
    PROVIDER_STACK.with(|stack| stack.borrow_mut().clear());
}

// =============================================================================
// ACCESSORS
// =============================================================================

/// Write handle for one field of the current store.
pub struct Setter<F: Field> {
    store: Rc<GlobalStore>,
    _field: PhantomData<F>,
}

impl<F: Field> Setter<F> {
    fn new(store: Rc<GlobalStore>) -> Self {
        Self {
            store,
            _field: PhantomData,
        }
    }

    /// Buffer `value` for the next flush. `false` if it was already the visible value.
    pub fn set(&self, value: F::Value) -> bool {
        self.store.set::<F>(value)
    }
}

impl<F: Field> Clone for Setter<F> {
    fn clone(&self) -> Self {
        Self::new(Rc::clone(&self.store))
    }
}

impl<F: Field> fmt::Debug for Setter<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setter").field("field", &F::NAME).finish()
    }
}

/// Value and setter for `F` from the current provider.
///
/// `(None, None)` when no provider is mounted.
pub fn use_global<F: Field>() -> (Option<F::Value>, Option<Setter<F>>) {
    match current_store() {
        Some(store) => (Some(store.get::<F>()), Some(Setter::new(store))),
        None => (None, None),
    }
}

/// Like [`use_global`], but a missing provider is an error.
pub fn try_use_global<F: Field>() -> Result<(F::Value, Setter<F>), BusError> {
    let store = current_store().ok_or(BusError::NoProvider)?;
    Ok((store.get::<F>(), Setter::new(store)))
}

/// Point reader over the current store.
#[derive(Clone, Default)]
pub struct GetGlobal {
    store: Option<Rc<GlobalStore>>,
}

impl GetGlobal {
    /// Latest value of `F`, including writes that have not flushed yet.
    pub fn get<F: Field>(&self) -> Option<F::Value> {
        self.store.as_ref().map(|store| store.get::<F>())
    }
}

pub fn use_get_global() -> GetGlobal {
    GetGlobal {
        store: current_store(),
    }
}
