//! Registry of event types and their handlers.
//!
//! Registration happens only while the engine is being built, through
//! [`EngineBuilder`](crate::EngineBuilder); a built engine's registry is
//! immutable. Each registered type gets an [`EventInfo`]: its static
//! description plus at most one reactor, at most one corrector, and any
//! number of vetoes.

use std::any::TypeId;
use std::collections::HashMap;

use smallvec::SmallVec;

use crate::core::{interface_closure, Event, Interface};
use crate::corrector::AnyCorrector;
use crate::error::ReactorError;
use crate::isolation::Isolation;
use crate::reactor::AnyReactor;
use crate::schema::{Schema, TableSchema};
use crate::store::kind_table;
use crate::veto::{AnyVeto, InterfaceVeto};

/// Static, handler-free description of an event type.
#[derive(Debug, Clone)]
pub struct EventDescriptor {
    pub kind: &'static str,
    pub type_name: &'static str,
    pub schema: Schema,
    /// Transitive closure of the implemented interfaces.
    pub interfaces: SmallVec<[&'static Interface; 4]>,
}

impl EventDescriptor {
    pub fn of<E: Event>() -> Self {
        Self {
            kind: E::KIND,
            type_name: std::any::type_name::<E>(),
            schema: E::schema(),
            interfaces: interface_closure(E::interfaces()),
        }
    }

    /// Table holding this kind's own fields.
    pub fn table(&self) -> TableSchema {
        TableSchema::new(kind_table(self.kind), self.schema.clone())
    }

    pub fn implements(&self, interface: &str) -> bool {
        self.interfaces.iter().any(|i| i.name == interface)
    }
}

/// Registered metadata and handlers of one event type.
pub struct EventInfo<D> {
    descriptor: EventDescriptor,
    pub(crate) reactor: Option<Box<dyn AnyReactor<D>>>,
    pub(crate) corrector: Option<Box<dyn AnyCorrector<D>>>,
    pub(crate) vetoes: Vec<Box<dyn AnyVeto<D>>>,
}

impl<D> EventInfo<D> {
    fn new(descriptor: EventDescriptor) -> Self {
        Self {
            descriptor,
            reactor: None,
            corrector: None,
            vetoes: Vec::new(),
        }
    }

    pub fn descriptor(&self) -> &EventDescriptor {
        &self.descriptor
    }

    pub fn kind(&self) -> &'static str {
        self.descriptor.kind
    }

    pub fn interfaces(&self) -> &[&'static Interface] {
        &self.descriptor.interfaces
    }

    pub fn has_reactor(&self) -> bool {
        self.reactor.is_some()
    }

    pub fn has_corrector(&self) -> bool {
        self.corrector.is_some()
    }

    pub fn veto_count(&self) -> usize {
        self.vetoes.len()
    }

    /// Isolation declared by the reactor, if one is registered.
    pub fn declared_isolation(&self) -> Option<Isolation> {
        self.reactor.as_ref().map(|r| r.isolation())
    }
}

impl<D> std::fmt::Debug for EventInfo<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventInfo")
            .field("kind", &self.descriptor.kind)
            .field("interfaces", &self.descriptor.interfaces)
            .field("has_reactor", &self.has_reactor())
            .field("has_corrector", &self.has_corrector())
            .field("veto_count", &self.vetoes.len())
            .finish()
    }
}

pub(crate) struct EventRegistry<D> {
    events: HashMap<TypeId, EventInfo<D>>,
    interface_vetoes: HashMap<&'static str, Vec<Box<dyn InterfaceVeto<D>>>>,
}

impl<D> Default for EventRegistry<D> {
    fn default() -> Self {
        Self {
            events: HashMap::new(),
            interface_vetoes: HashMap::new(),
        }
    }
}

impl<D: Send + Sync + 'static> EventRegistry<D> {
    /// Register an event type. Idempotent.
    pub fn register<E: Event>(&mut self) -> &mut EventInfo<D> {
        self.events
            .entry(TypeId::of::<E>())
            .or_insert_with(|| EventInfo::new(EventDescriptor::of::<E>()))
    }

    pub fn describe<E: Event>(&self) -> Result<&EventInfo<D>, ReactorError> {
        self.by_type_id(TypeId::of::<E>())
            .ok_or_else(|| ReactorError::NotRegistered {
                type_name: std::any::type_name::<E>().to_string(),
            })
    }

    pub fn by_type_id(&self, type_id: TypeId) -> Option<&EventInfo<D>> {
        self.events.get(&type_id)
    }

    pub fn add_interface_veto(&mut self, interface: &'static str, veto: Box<dyn InterfaceVeto<D>>) {
        self.interface_vetoes.entry(interface).or_default().push(veto);
    }

    pub fn interface_vetoes(&self, interface: &str) -> &[Box<dyn InterfaceVeto<D>>] {
        self.interface_vetoes
            .get(interface)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Kinds sharing a name with another registered type.
    pub fn duplicate_kinds(&self) -> Vec<&'static str> {
        let mut seen: HashMap<&'static str, usize> = HashMap::new();
        for info in self.events.values() {
            *seen.entry(info.kind()).or_default() += 1;
        }
        let mut duplicates: Vec<_> = seen
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(kind, _)| kind)
            .collect();
        duplicates.sort_unstable();
        duplicates
    }

    pub fn descriptors(&self) -> impl Iterator<Item = EventDescriptor> + '_ {
        self.events.values().map(|info| info.descriptor.clone())
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}
