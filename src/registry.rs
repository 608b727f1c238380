//! # Instance-attribute registry with weakly referenced instance keys.
//!
//! [`InstanceRegistry`] is a two-level mapping: an [`InstanceKey`] (a weak,
//! type-erased handle to an `Arc` instance) maps to an inner mapping from an
//! attribute key to a value. The registry never keeps an instance alive;
//! once the last strong reference to an instance is dropped, the next
//! registry operation sweeps its entire inner mapping away — values are
//! dropped, which is how resources tied to an instance (a timer binding,
//! for example) get released.
//!
//! The registry is **not** internally synchronized. Callers own the locking
//! for multi-step sequences; the run-once and timer controllers each wrap a
//! registry in one coarse mutex.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Weak};

/// Declaration-site identity of a procedure or attribute.
///
/// The interception layer passes a stable token per call site so that two
/// invocations of the same declaration compare equal. Any `'static` string
/// works; [`type_site`] derives one for type-level (static) declarations.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SiteKey(&'static str);

impl SiteKey {
    /// Creates a site key from a stable token.
    pub const fn new(token: &'static str) -> Self {
        Self(token)
    }

    /// The underlying token.
    pub const fn token(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for SiteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Derives a site key for a static (type-level) declaration.
///
/// Two calls for the same `T` yield equal keys, which makes the type itself
/// usable as the "instance-less" identity of a static procedure.
pub fn type_site<T: 'static>() -> SiteKey {
    SiteKey(std::any::type_name::<T>())
}

/// Weak, type-erased handle to an external instance.
///
/// Identity is the instance's allocation address; liveness is tracked with
/// a [`Weak`], so the key never keeps its target alive. A dead key is
/// swept out of any registry on the registry's next operation.
#[derive(Clone)]
pub struct InstanceKey {
    addr: usize,
    live: Weak<dyn Any + Send + Sync>,
}

impl InstanceKey {
    /// Creates a key for the given instance.
    pub fn of<T: Send + Sync + 'static>(instance: &Arc<T>) -> Self {
        let erased: Arc<dyn Any + Send + Sync> = instance.clone();
        let live: Weak<dyn Any + Send + Sync> = Arc::downgrade(&erased);
        Self {
            addr: Arc::as_ptr(instance) as *const () as usize,
            live,
        }
    }

    /// True while the target instance has strong references.
    pub fn is_live(&self) -> bool {
        self.live.strong_count() > 0
    }
}

impl PartialEq for InstanceKey {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for InstanceKey {}

impl Hash for InstanceKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

impl fmt::Debug for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceKey")
            .field("addr", &(self.addr as *const ()))
            .field("live", &self.is_live())
            .finish()
    }
}

/// Two-level mapping from a weakly referenced instance to its attributes.
///
/// The instance/attribute aliasing hazard of object-keyed designs (the
/// instance doubling as its own attribute key) cannot arise here: instance
/// keys and attribute keys are distinct types.
pub struct InstanceRegistry<A, V> {
    catalog: HashMap<InstanceKey, HashMap<A, V>>,
}

impl<A: Eq + Hash, V> InstanceRegistry<A, V> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            catalog: HashMap::new(),
        }
    }

    /// Drops every entry whose instance is no longer reachable.
    fn sweep(&mut self) {
        self.catalog.retain(|key, _| key.is_live());
    }

    /// True when the attribute is recorded for the instance.
    pub fn contains(&mut self, instance: &InstanceKey, attribute: &A) -> bool {
        self.sweep();
        self.catalog
            .get(instance)
            .is_some_and(|attrs| attrs.contains_key(attribute))
    }

    /// Records the attribute unless it is already present.
    ///
    /// Returns `true` iff the value was inserted by this call.
    pub fn check_and_add(&mut self, instance: InstanceKey, attribute: A, value: V) -> bool {
        self.sweep();
        let attrs = self.catalog.entry(instance).or_default();
        if attrs.contains_key(&attribute) {
            return false;
        }
        attrs.insert(attribute, value);
        true
    }

    /// Records the attribute unconditionally.
    ///
    /// Returns the previous value, if any.
    pub fn add(&mut self, instance: InstanceKey, attribute: A, value: V) -> Option<V> {
        self.sweep();
        self.catalog
            .entry(instance)
            .or_default()
            .insert(attribute, value)
    }

    /// Number of live instances currently tracked.
    pub fn instance_count(&mut self) -> usize {
        self.sweep();
        self.catalog.len()
    }
}

impl<A: Eq + Hash, V> Default for InstanceRegistry<A, V> {
    fn default() -> Self {
        Self::new()
    }
}
