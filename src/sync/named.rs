/*!
 * Named Objects
 *
 * Open-or-create boundary for primitives shared by name. The core only needs to know whether a call
 * created the object or attached to an existing one; how the host shares it (in-process table,
 * OS handle, ...) is the host's business.
 *
 * [`ProcessNamespace`] is the in-process host: a weak registry, so a name is released once the last
 * handle to its object is dropped.
 */

use crate::core::{SyncError, SyncResult};
use ahash::RandomState;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use tracing::debug;

const PRIMITIVE: &str = "named object";

type Erased = dyn Any + Send + Sync;

/// Result of an open-or-create call
#[derive(Debug)]
pub struct Opened<T> {
    pub handle: Arc<T>,
    /// True if this call established the object, false if it attached to an existing one
    pub created_new: bool,
}

/// Host environment that shares objects by name
pub trait NamedObjectHost: Send + Sync {
    /// Return the object bound to `name`, creating it with `create` if none exists
    fn open_or_create<T, F>(&self, name: &str, create: F) -> SyncResult<Opened<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T;
}

/// In-process named object table
pub struct ProcessNamespace {
    objects: DashMap<String, Weak<Erased>, RandomState>,
}

impl ProcessNamespace {
    pub fn new() -> Self {
        Self {
            objects: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Namespace shared by the whole process
    pub fn global() -> &'static ProcessNamespace {
        static GLOBAL: OnceLock<ProcessNamespace> = OnceLock::new();
        GLOBAL.get_or_init(ProcessNamespace::new)
    }

    /// True if `name` is bound to a live object
    pub fn contains(&self, name: &str) -> bool {
        self.objects
            .get(name)
            .is_some_and(|entry| entry.strong_count() > 0)
    }

    /// Drop entries whose objects are gone; returns how many were removed
    pub fn purge(&self) -> usize {
        let before = self.objects.len();
        self.objects.retain(|_, object| object.strong_count() > 0);
        before - self.objects.len()
    }

    fn bind<T: Any + Send + Sync>(object: T) -> (Arc<T>, Weak<Erased>) {
        let handle = Arc::new(object);
        let erased: Arc<Erased> = handle.clone();
        let weak = Arc::downgrade(&erased);
        (handle, weak)
    }
}

impl NamedObjectHost for ProcessNamespace {
    /// `create` runs while the name's shard is locked and must not open other names
    fn open_or_create<T, F>(&self, name: &str, create: F) -> SyncResult<Opened<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        if name.is_empty() {
            return Err(SyncError::InvalidArgument {
                primitive: PRIMITIVE,
                detail: "name must not be empty",
            });
        }

        match self.objects.entry(name.to_owned()) {
            Entry::Occupied(mut slot) => {
                if let Some(existing) = slot.get().upgrade() {
                    return existing
                        .downcast::<T>()
                        .map(|handle| Opened {
                            handle,
                            created_new: false,
                        })
                        .map_err(|_| SyncError::InvalidState {
                            primitive: PRIMITIVE,
                            detail: "name is bound to an object of another type",
                        });
                }
                let (handle, weak) = Self::bind(create());
                slot.insert(weak);
                debug!(name, "Re-created named object");
                Ok(Opened {
                    handle,
                    created_new: true,
                })
            }
            Entry::Vacant(slot) => {
                let (handle, weak) = Self::bind(create());
                slot.insert(weak);
                debug!(name, "Created named object");
                Ok(Opened {
                    handle,
                    created_new: true,
                })
            }
        }
    }
}

impl Default for ProcessNamespace {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProcessNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessNamespace")
            .field("entries", &self.objects.len())
            .finish()
    }
}
