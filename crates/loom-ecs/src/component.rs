//! Component type registration and reflection metadata.
//!
//! Every component type must be registered in a [`ComponentRegistry`] before
//! a world can store it. Registration assigns a [`ComponentTypeId`] and builds
//! a small function table (default-construct, JSON conversion, clone, column
//! factory) so that generic layers can create, copy and (de)serialize
//! components knowing only the id or the registered name.
//!
//! A registry is built once at startup and then shared, frozen, between every
//! world of the process through an `Arc`. Ids therefore stay stable for the
//! lifetime of the process and two worlds never disagree about them.

use std::any::{Any, TypeId};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::storage::{ComponentColumn, SparseColumn};
use crate::EcsError;

/// Upper bound on registered component types (width of a component mask).
pub const MAX_COMPONENTS: usize = 256;

/// Capability tag carried by every registered component.
pub const SERIALIZABLE: &str = "serializable";

// ---------------------------------------------------------------------------
// Component trait
// ---------------------------------------------------------------------------

/// Marker trait for types that can be stored as components.
///
/// Implemented automatically for every type with the required bounds. The
/// `Default` bound backs generic default-construction (editor "add
/// component", scripted spawns); the serde bounds back reflection.
pub trait Component: Clone + Default + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Component for T where T: Clone + Default + Send + Sync + Serialize + DeserializeOwned + 'static
{}

/// A type-erased, owned component value.
pub type BoxedComponent = Box<dyn Any + Send + Sync>;

/// Builtin human-readable entity name, registered in every registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Name(pub String);

impl Name {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

// ---------------------------------------------------------------------------
// ComponentTypeId
// ---------------------------------------------------------------------------

/// Dense per-registry index of a component type; doubles as its bit in a
/// [`ComponentMask`](crate::signature::ComponentMask).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentTypeId(pub(crate) u32);

impl ComponentTypeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Reflection metadata
// ---------------------------------------------------------------------------

/// JSON shape of a reflected property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl PropertyKind {
    fn of(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(_) => Self::Bool,
            serde_json::Value::Number(_) => Self::Number,
            serde_json::Value::String(_) => Self::String,
            serde_json::Value::Array(_) => Self::Array,
            serde_json::Value::Object(_) => Self::Object,
        }
    }
}

/// One named, typed field of a component, as seen by serialization and
/// generic editor display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyInfo {
    pub name: String,
    pub kind: PropertyKind,
}

/// Reflection record kept for every registered component type.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    /// Id assigned at registration time.
    pub id: ComponentTypeId,
    /// Registered name (unique within the registry).
    pub name: String,
    /// `std::any::type_name::<T>()`, for diagnostics only.
    pub type_name: &'static str,
    /// In-memory size and alignment of `T`.
    pub size: usize,
    pub align: usize,
    pub type_id: TypeId,
    /// `T::default()` serialized to JSON.
    pub default_value: serde_json::Value,
    /// Top-level fields of the serialized default. Empty for components that
    /// do not serialize to a JSON object (newtypes, unit structs).
    pub properties: Vec<PropertyInfo>,
    /// Capability tags such as `"serializable"` or `"editor"`.
    pub capabilities: BTreeSet<String>,
}

impl ComponentInfo {
    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.contains(tag)
    }

    pub fn property(&self, name: &str) -> Option<&PropertyInfo> {
        self.properties.iter().find(|p| p.name == name)
    }
}

// ---------------------------------------------------------------------------
// ComponentVtable
// ---------------------------------------------------------------------------

/// Per-type function table populated at registration.
#[derive(Clone, Copy)]
pub(crate) struct ComponentVtable {
    pub new_column: fn() -> Box<dyn ComponentColumn>,
    pub default_value: fn() -> BoxedComponent,
    pub clone_value: fn(&dyn Any) -> Option<BoxedComponent>,
    pub to_json: fn(&dyn Any) -> Result<serde_json::Value, String>,
    pub from_json: fn(&serde_json::Value) -> Result<BoxedComponent, String>,
}

impl ComponentVtable {
    fn of<T: Component>() -> Self {
        Self {
            new_column: || Box::new(SparseColumn::<T>::new()) as Box<dyn ComponentColumn>,
            default_value: || Box::new(T::default()) as BoxedComponent,
            clone_value: |value| {
                value
                    .downcast_ref::<T>()
                    .map(|v| Box::new(v.clone()) as BoxedComponent)
            },
            to_json: |value| {
                let typed = value
                    .downcast_ref::<T>()
                    .ok_or_else(|| format!("value is not a {}", std::any::type_name::<T>()))?;
                serde_json::to_value(typed).map_err(|e| e.to_string())
            },
            from_json: |value| {
                let typed: T = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
                Ok(Box::new(typed) as BoxedComponent)
            },
        }
    }
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Registry mapping Rust types and names to [`ComponentTypeId`]s, their
/// metadata and their function tables.
pub struct ComponentRegistry {
    by_type: HashMap<TypeId, ComponentTypeId>,
    by_name: HashMap<String, ComponentTypeId>,
    /// Indexed by `ComponentTypeId.0`.
    infos: Vec<ComponentInfo>,
    /// Indexed by `ComponentTypeId.0`.
    vtables: Vec<ComponentVtable>,
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("components", &self.registered_names())
            .finish()
    }
}

impl ComponentRegistry {
    /// Create a registry holding only the builtin [`Name`] component.
    pub fn new() -> Self {
        let mut registry = Self {
            by_type: HashMap::new(),
            by_name: HashMap::new(),
            infos: Vec::new(),
            vtables: Vec::new(),
        };
        registry.register::<Name>("name");
        registry
    }

    /// Register a component type under `name`.
    ///
    /// Registering the same type (or the same name) twice is a configuration
    /// error: it asserts in debug builds and, in release, logs and returns
    /// the id of the earlier registration.
    pub fn register<T: Component>(&mut self, name: &str) -> ComponentTypeId {
        self.register_with_capabilities::<T>(name, &[])
    }

    /// Register a component type with extra capability tags.
    pub fn register_with_capabilities<T: Component>(
        &mut self,
        name: &str,
        capabilities: &[&str],
    ) -> ComponentTypeId {
        let rust_type_id = TypeId::of::<T>();
        if let Some(&existing) = self.by_type.get(&rust_type_id) {
            tracing::error!(
                component = name,
                existing = %self.infos[existing.index()].name,
                "component type registered twice"
            );
            debug_assert!(false, "component type '{name}' registered twice");
            return existing;
        }
        if let Some(&existing) = self.by_name.get(name) {
            tracing::error!(component = name, "component name already taken by another type");
            debug_assert!(false, "component name '{name}' is already registered for a different type");
            return existing;
        }
        assert!(
            self.infos.len() < MAX_COMPONENTS,
            "too many component types (limit {MAX_COMPONENTS})"
        );

        let id = ComponentTypeId(self.infos.len() as u32);
        let default_value = serde_json::to_value(T::default()).unwrap_or(serde_json::Value::Null);
        let properties = match &default_value {
            serde_json::Value::Object(map) => map
                .iter()
                .map(|(key, value)| PropertyInfo {
                    name: key.clone(),
                    kind: PropertyKind::of(value),
                })
                .collect(),
            _ => Vec::new(),
        };
        let mut caps: BTreeSet<String> = capabilities.iter().map(|c| (*c).to_owned()).collect();
        caps.insert(SERIALIZABLE.to_owned());

        self.infos.push(ComponentInfo {
            id,
            name: name.to_owned(),
            type_name: std::any::type_name::<T>(),
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            type_id: rust_type_id,
            default_value,
            properties,
            capabilities: caps,
        });
        self.vtables.push(ComponentVtable::of::<T>());
        self.by_type.insert(rust_type_id, id);
        self.by_name.insert(name.to_owned(), id);
        tracing::trace!(component = name, id = id.0, "registered component type");
        id
    }

    /// Look up a component type by its Rust type.
    pub fn lookup<T: 'static>(&self) -> Option<ComponentTypeId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Look up a component type by its registered name.
    pub fn lookup_by_name(&self, name: &str) -> Option<ComponentTypeId> {
        self.by_name.get(name).copied()
    }

    /// Resolve `name`, producing [`EcsError::UnknownComponent`] on failure.
    pub fn resolve(&self, name: &str) -> Result<ComponentTypeId, EcsError> {
        self.lookup_by_name(name)
            .ok_or_else(|| EcsError::UnknownComponent {
                name: name.to_owned(),
                registered: self.registered_names().join(", "),
            })
    }

    pub fn get_info(&self, id: ComponentTypeId) -> Option<&ComponentInfo> {
        self.infos.get(id.index())
    }

    pub fn info_by_name(&self, name: &str) -> Option<&ComponentInfo> {
        self.lookup_by_name(name).and_then(|id| self.get_info(id))
    }

    pub(crate) fn vtable(&self, id: ComponentTypeId) -> &ComponentVtable {
        &self.vtables[id.index()]
    }

    /// Iterate metadata of every registered component in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.infos.iter()
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Names of all registered component types, sorted.
    pub fn registered_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
