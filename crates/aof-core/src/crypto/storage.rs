//! In-memory snapshot of the two key-storage scopes.
//!
//! The key session never touches a disk.  Before an operation the host copies
//! the current contents of both scopes into a [`StorageProxy`]; the session
//! reads and writes the proxy; afterwards the host takes the recorded
//! [`StorageMutations`] and applies them to real storage.

/// Where a persisted key record lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageScope {
    /// Lives as long as the client process.
    Session,
    /// Survives restarts.
    Durable,
}

/// A change the host must apply to one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageMutation {
    Set(String),
    Remove,
}

/// Mutations recorded since the last snapshot, per scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageMutations {
    pub session: Option<StorageMutation>,
    pub durable: Option<StorageMutation>,
}

impl StorageMutations {
    pub fn is_empty(&self) -> bool {
        self.session.is_none() && self.durable.is_none()
    }
}

#[derive(Debug, Default)]
struct Slot {
    value: Option<String>,
    mutation: Option<StorageMutation>,
}

/// Snapshot of both scopes plus the mutations made to it.
#[derive(Debug, Default)]
pub struct StorageProxy {
    session: Slot,
    durable: Slot,
}

impl StorageProxy {
    /// Replaces the snapshot and forgets any recorded mutations.
    pub fn load(&mut self, session: Option<String>, durable: Option<String>) {
        self.session = Slot {
            value: session.filter(|v| !v.is_empty()),
            mutation: None,
        };
        self.durable = Slot {
            value: durable.filter(|v| !v.is_empty()),
            mutation: None,
        };
    }

    pub fn get(&self, scope: StorageScope) -> Option<&str> {
        self.slot(scope).value.as_deref()
    }

    pub fn set(&mut self, scope: StorageScope, value: String) {
        let slot = self.slot_mut(scope);
        slot.value = Some(value.clone());
        slot.mutation = Some(StorageMutation::Set(value));
    }

    pub fn remove(&mut self, scope: StorageScope) {
        let slot = self.slot_mut(scope);
        slot.value = None;
        slot.mutation = Some(StorageMutation::Remove);
    }

    /// Returns the mutations recorded since the last [`load`](Self::load) or
    /// `take_mutations`, and clears them.
    pub fn take_mutations(&mut self) -> StorageMutations {
        StorageMutations {
            session: self.session.mutation.take(),
            durable: self.durable.mutation.take(),
        }
    }

    fn slot(&self, scope: StorageScope) -> &Slot {
        match scope {
            StorageScope::Session => &self.session,
            StorageScope::Durable => &self.durable,
        }
    }

    fn slot_mut(&mut self, scope: StorageScope) -> &mut Slot {
        match scope {
            StorageScope::Session => &mut self.session,
            StorageScope::Durable => &mut self.durable,
        }
    }
}
