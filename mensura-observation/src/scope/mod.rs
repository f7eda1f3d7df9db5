//! Thread-local scopes.
//!
//! Each thread keeps, per registry, a pointer to its innermost open [`Scope`].
//! Every scope links to the scope that was current when it was opened, so the
//! chain of `previous` links reconstructs the nesting of scopes still open on
//! the thread. [`Scope::reset`] truncates that chain without closing anything
//! and [`Scope::make_current`] re-installs it.
//!
//! Besides the chain, every live observation keeps a per-thread stack of the
//! scopes that were current each time it opened a scope of its own, exposed
//! as [`Observation::enclosing_scope`].
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use mensura_commons::mensura_debug;

use crate::{Observation, ObservationRegistry};


thread_local! {
    static CURRENT_SCOPES: RefCell<HashMap<u64, Scope>> = RefCell::new(HashMap::new());
    static ENCLOSING_SCOPES: RefCell<HashMap<u64, Vec<Scope>>> = RefCell::new(HashMap::new());
}

/// A thread-local activation of an [`Observation`].
///
/// While a scope is current, [`ObservationRegistry::current_observation`]
/// returns its observation on the thread that opened it. Scopes cannot be
/// sent to other threads; hand the observation over instead and open a new
/// scope there.
///
/// Closing is explicit; wrap a scope in a [`ScopeGuard`] to close it on drop.
/// The noop scope, returned for the noop observation, does nothing.
#[derive(Clone, Default)]
pub struct Scope {
    frame: Option<Rc<ScopeFrame>>,
}

struct ScopeFrame {
    registry: ObservationRegistry,
    observation: Observation,
    observation_id: u64,
    previous: Option<Scope>,
    closed: Cell<bool>,
}

impl Scope {
    /// The noop scope.
    pub const fn noop() -> Self {
        Scope { frame: None }
    }

    /// Whether this is the noop scope.
    pub fn is_noop(&self) -> bool {
        self.frame.is_none()
    }

    /// The observation this scope activates; the noop observation for the
    /// noop scope.
    pub fn observation(&self) -> Observation {
        self.frame
            .as_ref()
            .map(|frame| frame.observation.clone())
            .unwrap_or_default()
    }

    /// The scope that was current when this one was opened.
    pub fn previous(&self) -> Option<Scope> {
        self.frame.as_ref().and_then(|frame| frame.previous.clone())
    }

    /// Closes the scope.
    ///
    /// Restores the thread's current scope to [`previous`](Scope::previous)
    /// and notifies handlers' `on_scope_closed` in reverse registration
    /// order. Scopes need not be closed in the order they were opened; closing
    /// an outer scope first simply restores what was current before it.
    /// Closing a closed scope does nothing.
    pub fn close(&self) {
        let Some(frame) = &self.frame else {
            return;
        };
        if frame.closed.replace(true) {
            mensura_debug!(name: "Scope.AlreadyClosed", observation_id = frame.observation_id);
            return;
        }
        pop_enclosing(frame.observation_id);
        set_current(frame.registry.id(), frame.previous.clone());
        frame.observation.notify_scope_closed();
    }

    /// Detaches this scope and every scope before it from the thread.
    ///
    /// Walks the `previous` chain; for each scope the thread's current scope
    /// becomes that scope's previous one and its observation's handlers get
    /// `on_scope_reset`. Nothing is closed, so handlers do not see
    /// `on_scope_closed`.
    pub fn reset(&self) {
        let mut next = self.frame.clone();
        while let Some(frame) = next {
            set_current(frame.registry.id(), frame.previous.clone());
            frame.observation.notify_scope_reset();
            next = frame.previous.as_ref().and_then(|p| p.frame.clone());
        }
    }

    /// Re-installs this scope and its chain as current on the calling thread.
    ///
    /// Handlers of this scope's observation get `on_scope_reset`, then every
    /// scope of the chain is re-opened from the outermost inwards, notifying
    /// `on_scope_opened`.
    pub fn make_current(&self) {
        let Some(frame) = &self.frame else {
            return;
        };
        frame.observation.notify_scope_reset();
        pop_enclosing(frame.observation_id);

        let mut chain = Vec::new();
        let mut next = Some(self.clone());
        while let Some(scope) = next {
            next = scope.previous();
            chain.push(scope);
        }
        for scope in chain.iter().rev() {
            if let Some(frame) = &scope.frame {
                frame.closed.set(false);
                frame.observation.notify_scope_opened();
            }
        }
        set_current(frame.registry.id(), Some(self.clone()));
    }

    /// Wraps this scope so that it closes when dropped.
    pub fn guard(self) -> ScopeGuard {
        ScopeGuard { scope: self }
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        match (&self.frame, &other.frame) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Eq for Scope {}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.frame {
            None => f.write_str("NoopScope"),
            Some(frame) => f
                .debug_struct("Scope")
                .field("observation_id", &frame.observation_id)
                .field("closed", &frame.closed.get())
                .field("previous", &frame.previous)
                .finish(),
        }
    }
}

/// Closes the wrapped [`Scope`] when dropped.
#[derive(Debug)]
#[must_use = "dropping the guard closes the scope immediately"]
pub struct ScopeGuard {
    scope: Scope,
}

impl ScopeGuard {
    /// The guarded scope.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.scope.close();
    }
}

pub(crate) fn open(observation: Observation, registry: ObservationRegistry, observation_id: u64) -> Scope {
    let previous = current(registry.id());
    if let Some(previous) = &previous {
        push_enclosing(observation_id, previous.clone());
    }
    let registry_id = registry.id();
    let scope = Scope {
        frame: Some(Rc::new(ScopeFrame {
            registry,
            observation,
            observation_id,
            previous,
            closed: Cell::new(false),
        })),
    };
    set_current(registry_id, Some(scope.clone()));
    scope.observation().notify_scope_opened();
    scope
}

pub(crate) fn current(registry_id: u64) -> Option<Scope> {
    CURRENT_SCOPES.with(|scopes| scopes.borrow().get(&registry_id).cloned())
}

pub(crate) fn set_current(registry_id: u64, scope: Option<Scope>) {
    // the replaced scope is dropped outside of the borrow
    let _replaced = CURRENT_SCOPES.with(|scopes| {
        let mut scopes = scopes.borrow_mut();
        match scope {
            Some(scope) => scopes.insert(registry_id, scope),
            None => scopes.remove(&registry_id),
        }
    });
}

pub(crate) fn enclosing(observation_id: u64) -> Option<Scope> {
    ENCLOSING_SCOPES.with(|enclosing| {
        enclosing
            .borrow()
            .get(&observation_id)
            .and_then(|stack| stack.last().cloned())
    })
}

pub(crate) fn clear_enclosing(observation_id: u64) {
    let _cleared = ENCLOSING_SCOPES.with(|enclosing| enclosing.borrow_mut().remove(&observation_id));
}

fn push_enclosing(observation_id: u64, scope: Scope) {
    ENCLOSING_SCOPES.with(|enclosing| {
        enclosing
            .borrow_mut()
            .entry(observation_id)
            .or_default()
            .push(scope)
    });
}

fn pop_enclosing(observation_id: u64) {
    let _popped = ENCLOSING_SCOPES.with(|enclosing| {
        let mut enclosing = enclosing.borrow_mut();
        let stack = enclosing.get_mut(&observation_id)?;
        let popped = stack.pop();
        if stack.is_empty() {
            enclosing.remove(&observation_id);
        }
        popped
    });
}
