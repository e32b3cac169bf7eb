// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The type registry: a map of user-type to field-descriptor list, plus
//! inheritance and sub-type resolution. The registry is populated once
//! (by the external schema-discovery collaborator, or by hand-written
//! setup calls) and then frozen; after freeze, descriptors are immutable
//! and may be read concurrently by many serialization contexts.
//!
//! Mutation while open is serialized behind a single writer's lock with a
//! configurable deadline (`RegistryOptions::metadata_timeout_ms`), matching
//! the teacher's use of `parking_lot::Mutex` for timed locking rather than
//! hand-rolling a condvar/deadline loop over `std::sync::Mutex`.

use std::any::TypeId;
use std::collections::HashMap;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::descriptor::FieldDescriptor;
use crate::error::{Error, Result};
use crate::value::{DeserializeHook, Factory, SerializeHook};

/// Index of a registered type within a [`TypeRegistry`]. Descriptors refer
/// to other types by this index rather than by pointer, so the registry's
/// backing `Vec` can grow during population without invalidating existing
/// entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeKey(pub(crate) u32);

/// Runtime-tunable, opt-in behavior for a registry. See §6 of the
/// specification this crate implements.
#[derive(Clone, Debug)]
pub struct RegistryOptions {
    /// Enable per-call string sharing: equal strings read during one
    /// deserialize call allocate once and share that allocation.
    pub intern_strings: bool,
    /// Serialize the date-time "kind" discriminator in the legacy
    /// scaled-ticks well-known-type format.
    pub include_datetime_kind: bool,
    /// If a runtime value's type has no registry entry, synthesize one
    /// from reflective hints instead of failing.
    pub auto_add_missing_types: bool,
    /// Treat absent scalars (and enums) as their zero value without
    /// requiring an explicit default on the descriptor: suppressed on
    /// write, seeded on read, for any field that carries no
    /// `FieldDescriptor::default` of its own.
    pub use_implicit_zero_defaults: bool,
    /// Fall back to string round-tripping via a type's parse function
    /// when no codec node matches.
    pub allow_parseable_types: bool,
    /// Registry lock deadline, in milliseconds.
    pub metadata_timeout_ms: u64,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            intern_strings: false,
            include_datetime_kind: false,
            auto_add_missing_types: false,
            use_implicit_zero_defaults: false,
            allow_parseable_types: false,
            metadata_timeout_ms: 5_000,
        }
    }
}

/// Per user type: its ordered field list, inheritance relations, and
/// lifecycle hooks.
pub struct TypeEntry {
    pub type_id: TypeId,
    pub name: &'static str,
    pub fields: Vec<FieldDescriptor>,
    field_by_number: HashMap<u32, usize>,
    pub base: Option<TypeKey>,
    /// Maps a registered child type to the discriminator field number used
    /// to carry its payload when this entry is the base.
    pub sub_types: HashMap<TypeKey, u32>,
    pub factory: Option<Factory>,
    pub before_serialize: Option<SerializeHook>,
    pub after_serialize: Option<SerializeHook>,
    pub before_deserialize: Option<DeserializeHook>,
    pub after_deserialize: Option<DeserializeHook>,
    /// If set, this type is never itself serialized; the surrogate type is
    /// serialized in its place, via a declared conversion the caller must
    /// apply (the registry only records the mapping).
    pub surrogate: Option<TypeKey>,
    /// Optional per-type flag (§4.C): track in-progress object identities
    /// while writing a graph rooted at this type and fail on a repeat.
    pub recursion_check: bool,
}

impl TypeEntry {
    pub fn new(type_id: TypeId, name: &'static str, fields: Vec<FieldDescriptor>) -> Result<Self> {
        let mut field_by_number = HashMap::with_capacity(fields.len());
        for (idx, field) in fields.iter().enumerate() {
            if field_by_number.insert(field.number, idx).is_some() {
                return Err(Error::DuplicateFieldNumber {
                    type_name: name,
                    number: field.number,
                });
            }
        }
        Ok(Self {
            type_id,
            name,
            fields,
            field_by_number,
            base: None,
            sub_types: HashMap::new(),
            factory: None,
            before_serialize: None,
            after_serialize: None,
            before_deserialize: None,
            after_deserialize: None,
            surrogate: None,
            recursion_check: false,
        })
    }

    pub fn field_by_number(&self, number: u32) -> Option<&FieldDescriptor> {
        self.field_by_number.get(&number).map(|&idx| &self.fields[idx])
    }

    pub fn with_base(mut self, base: TypeKey) -> Self {
        self.base = Some(base);
        self
    }

    pub fn with_factory(mut self, factory: Factory) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_surrogate(mut self, surrogate: TypeKey) -> Self {
        self.surrogate = Some(surrogate);
        self
    }

    pub fn with_recursion_check(mut self, enabled: bool) -> Self {
        self.recursion_check = enabled;
        self
    }

    pub fn with_before_serialize(mut self, hook: SerializeHook) -> Self {
        self.before_serialize = Some(hook);
        self
    }

    pub fn with_after_serialize(mut self, hook: SerializeHook) -> Self {
        self.after_serialize = Some(hook);
        self
    }

    pub fn with_before_deserialize(mut self, hook: DeserializeHook) -> Self {
        self.before_deserialize = Some(hook);
        self
    }

    pub fn with_after_deserialize(mut self, hook: DeserializeHook) -> Self {
        self.after_deserialize = Some(hook);
        self
    }
}

struct RegistryState {
    /// Entries are `Arc`-wrapped so `entry()` can clone one out and return
    /// it without holding `state`'s read lock for the duration of a
    /// recursive dispatch -- nested `state.read()` calls from the same
    /// thread (one message field recursing into another) would otherwise
    /// risk a `parking_lot::RwLock` deadlock if a writer (`register`) is
    /// queued in between.
    entries: Vec<Arc<TypeEntry>>,
    /// O(1) effective-type -> index cache, populated as types register.
    by_type_id: HashMap<TypeId, TypeKey>,
    /// Known wrapper/alias type ids (e.g. ORM-style proxy classes) that
    /// should resolve to a base type's key instead of their own.
    proxies: HashMap<TypeId, TypeKey>,
    frozen: bool,
}

/// Diagnostics recorded the last time the writer lock was contended.
struct ContentionState {
    count: AtomicU64,
    last_holder: Mutex<Option<&'static Location<'static>>>,
}

pub struct TypeRegistry {
    state: RwLock<RegistryState>,
    write_lock: Mutex<()>,
    contention: ContentionState,
    pub options: RegistryOptions,
}

impl TypeRegistry {
    pub fn new(options: RegistryOptions) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                entries: Vec::new(),
                by_type_id: HashMap::new(),
                proxies: HashMap::new(),
                frozen: false,
            }),
            write_lock: Mutex::new(()),
            contention: ContentionState {
                count: AtomicU64::new(0),
                last_holder: Mutex::new(None),
            },
            options,
        }
    }

    /// Acquires the writer lock with the configured deadline. Bumps the
    /// contention counter on timeout and fires a `lock-contended` trace
    /// event the next time the lock is actually released, if contention
    /// was observed during that hold.
    #[track_caller]
    fn acquire_write_lock(&self) -> Result<parking_lot::MutexGuard<'_, ()>> {
        let timeout = Duration::from_millis(self.options.metadata_timeout_ms);
        match self.write_lock.try_lock_for(timeout) {
            Some(guard) => {
                if self.contention.count.swap(0, Ordering::AcqRel) > 0 {
                    if let Some(holder) = self.contention.last_holder.lock().take() {
                        tracing::warn!(
                            held_at = %holder,
                            "registry writer lock was contended while held"
                        );
                    }
                }
                *self.contention.last_holder.lock() = Some(Location::caller());
                Ok(guard)
            }
            None => {
                self.contention.count.fetch_add(1, Ordering::AcqRel);
                Err(Error::MetadataTimeout {
                    timeout_ms: self.options.metadata_timeout_ms,
                })
            }
        }
    }

    /// Registers a new type, returning its key. Fails if the registry is
    /// frozen or the writer lock times out.
    #[track_caller]
    pub fn register(&self, entry: TypeEntry) -> Result<TypeKey> {
        let _guard = self.acquire_write_lock()?;
        let mut state = self.state.write();
        if state.frozen {
            return Err(Error::RegistryFrozen);
        }
        let key = TypeKey(state.entries.len() as u32);
        state.by_type_id.insert(entry.type_id, key);
        state.entries.push(entry);
        Ok(key)
    }

    /// Declares `child` as a sub-type of `base`, carried under
    /// `discriminator_field` when `base` is the static serialization type.
    #[track_caller]
    pub fn register_sub_type(
        &self,
        base: TypeKey,
        child: TypeKey,
        discriminator_field: u32,
    ) -> Result<()> {
        let _guard = self.acquire_write_lock()?;
        let mut state = self.state.write();
        if state.frozen {
            return Err(Error::RegistryFrozen);
        }
        state.entries[base.0 as usize]
            .sub_types
            .insert(child, discriminator_field);
        state.entries[child.0 as usize].base = Some(base);
        Ok(())
    }

    /// Registers `proxy` (e.g. an ORM lazy-loading wrapper class) as an
    /// alias that should resolve to `effective` whenever it's looked up.
    #[track_caller]
    pub fn register_proxy(&self, proxy: TypeId, effective: TypeKey) -> Result<()> {
        let _guard = self.acquire_write_lock()?;
        let mut state = self.state.write();
        state.proxies.insert(proxy, effective);
        Ok(())
    }

    /// Freezes the registry: after this call, `register*` fail and
    /// concurrent lookups need no further synchronization beyond the
    /// shared read lock.
    #[track_caller]
    pub fn freeze(&self) -> Result<()> {
        let _guard = self.acquire_write_lock()?;
        self.state.write().frozen = true;
        Ok(())
    }

    pub fn is_frozen(&self) -> bool {
        self.state.read().frozen
    }

    /// Resolves a runtime `TypeId` to its effective registered type,
    /// stripping a known proxy wrapper first.
    pub fn lookup(&self, type_id: TypeId) -> Option<TypeKey> {
        let state = self.state.read();
        let effective = state.proxies.get(&type_id).copied();
        match effective {
            Some(key) => Some(key),
            None => state.by_type_id.get(&type_id).copied(),
        }
    }

    pub fn with_entry<T>(&self, key: TypeKey, f: impl FnOnce(&TypeEntry) -> T) -> T {
        let state = self.state.read();
        f(&state.entries[key.0 as usize])
    }

    /// Clones out the `Arc<TypeEntry>` for `key` and releases the read lock
    /// immediately. The dispatch layer uses this (rather than `with_entry`)
    /// before recursing into nested message fields, since a recursive read
    /// lock on the same `parking_lot::RwLock` from one thread can deadlock
    /// against a writer parked in between the outer and inner acquisitions.
    pub fn entry(&self, key: TypeKey) -> Arc<TypeEntry> {
        self.state.read().entries[key.0 as usize].clone()
    }

    /// Walks from `key` to its rootmost base, returning keys rootmost-first.
    pub fn inheritance_chain(&self, key: TypeKey) -> Vec<TypeKey> {
        let state = self.state.read();
        let mut chain = vec![key];
        let mut current = key;
        while let Some(base) = state.entries[current.0 as usize].base {
            chain.push(base);
            current = base;
        }
        chain.reverse();
        chain
    }

    /// Whether `ancestor` is `target` or a registered base of `target`.
    /// Used by the inheritance dispatcher to find, at each base level,
    /// which immediate sub-type entry leads toward the runtime type.
    pub fn is_ancestor_or_self(&self, ancestor: TypeKey, target: TypeKey) -> bool {
        let state = self.state.read();
        is_ancestor_or_self_locked(&state, ancestor, target)
    }

    /// At `base`, finds the registered sub-type (and its discriminator
    /// field number) that lies on the path toward `runtime`. `None` means
    /// `runtime` isn't reachable through any of `base`'s declared
    /// sub-types -- an unexpected-sub-type surface error for the caller.
    pub fn sub_type_toward(&self, base: TypeKey, runtime: TypeKey) -> Option<(TypeKey, u32)> {
        let state = self.state.read();
        state.entries[base.0 as usize]
            .sub_types
            .iter()
            .find(|(child, _)| is_ancestor_or_self_locked(&state, **child, runtime))
            .map(|(child, field)| (*child, *field))
    }
}

fn is_ancestor_or_self_locked(state: &RegistryState, ancestor: TypeKey, target: TypeKey) -> bool {
    let mut current = target;
    loop {
        if current == ancestor {
            return true;
        }
        match state.entries[current.0 as usize].base {
            Some(base) => current = base,
            None => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{FieldDescriptorBuilder, ValueKind};
    use crate::descriptor::ScalarType;
    use crate::value::Value;
    use std::any::Any;

    fn dummy_field(number: u32) -> FieldDescriptor {
        FieldDescriptorBuilder::new(
            number,
            ValueKind::Scalar(ScalarType::Int32),
            Box::new(|_: &(dyn Any + Send + Sync)| Value::I32(0)),
            Box::new(|_: &mut (dyn Any + Send + Sync), _| {}),
        )
        .build()
    }

    #[test]
    fn duplicate_field_numbers_rejected() {
        let err = TypeEntry::new(
            TypeId::of::<i32>(),
            "Dummy",
            vec![dummy_field(1), dummy_field(1)],
        )
        .unwrap_err();
        assert!(matches!(err, Error::DuplicateFieldNumber { .. }));
    }

    #[test]
    fn register_then_freeze_then_lookup() {
        let registry = TypeRegistry::new(RegistryOptions::default());
        let entry = TypeEntry::new(TypeId::of::<i32>(), "Dummy", vec![dummy_field(1)]).unwrap();
        let key = registry.register(entry).unwrap();
        registry.freeze().unwrap();
        assert_eq!(registry.lookup(TypeId::of::<i32>()), Some(key));
        assert!(registry.register(
            TypeEntry::new(TypeId::of::<u8>(), "Other", vec![]).unwrap()
        )
        .is_err());
    }

    #[test]
    fn mutation_after_freeze_is_rejected_as_frozen_not_timeout() {
        let registry = TypeRegistry::new(RegistryOptions::default());
        let base = registry
            .register(TypeEntry::new(TypeId::of::<i32>(), "Base", vec![]).unwrap())
            .unwrap();
        let child = registry
            .register(TypeEntry::new(TypeId::of::<i64>(), "Child", vec![]).unwrap())
            .unwrap();
        registry.freeze().unwrap();

        let err = registry
            .register(TypeEntry::new(TypeId::of::<u8>(), "Other", vec![]).unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::RegistryFrozen));

        let err = registry.register_sub_type(base, child, 1).unwrap_err();
        assert!(matches!(err, Error::RegistryFrozen));
    }

    #[test]
    fn inheritance_chain_is_rootmost_first() {
        let registry = TypeRegistry::new(RegistryOptions::default());
        let base = registry
            .register(TypeEntry::new(TypeId::of::<i32>(), "Base", vec![]).unwrap())
            .unwrap();
        let mid = registry
            .register(TypeEntry::new(TypeId::of::<i64>(), "Mid", vec![]).unwrap())
            .unwrap();
        let leaf = registry
            .register(TypeEntry::new(TypeId::of::<u8>(), "Leaf", vec![]).unwrap())
            .unwrap();
        registry.register_sub_type(base, mid, 100).unwrap();
        registry.register_sub_type(mid, leaf, 200).unwrap();
        assert_eq!(registry.inheritance_chain(leaf), vec![base, mid, leaf]);
    }
}
