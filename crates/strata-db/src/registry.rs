//! Type registration and the opaque payload capability set.
//!
//! The store never inspects user objects directly. Each registered type
//! supplies an [`Exemplar`]: the capability to produce a nil value, deep-copy
//! a value, test a value for nil, and convert values to and from their
//! encoded form at the backend boundary. Inside the core a payload is just
//! `dyn Any`: boxed while a dirty version owns it privately, reference
//! counted once it is published as a committed version.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use strata_common::types::{LinkDecl, TypeSchema};
use strata_common::{StrataError, StrataResult};

/// A payload owned exclusively, as held by a dirty version.
pub type BoxedPayload = Box<dyn Any + Send + Sync>;

/// A payload shared immutably, as held by a committed version.
pub type SharedPayload = Arc<dyn Any + Send + Sync>;

/// The capability set a registered type provides to the store.
///
/// Implementations must treat values as immutable: `deep_copy` is the only
/// sanctioned way to derive a mutable value from a shared one.
pub trait Exemplar: Send + Sync {
    /// Produces the type's nil value. A stored object whose payload is nil
    /// is indistinguishable from an absent one.
    fn nil_value(&self) -> BoxedPayload;

    /// Produces an independent deep copy of `value`.
    fn deep_copy(&self, value: &(dyn Any + Send + Sync)) -> BoxedPayload;

    /// Returns true iff `value` is the type's nil value.
    fn is_nil(&self, value: &(dyn Any + Send + Sync)) -> bool;

    /// Encodes `value` for the backend.
    fn encode(&self, value: &(dyn Any + Send + Sync)) -> StrataResult<Bytes>;

    /// Decodes a payload previously produced by [`encode`].
    ///
    /// [`encode`]: Exemplar::encode
    fn decode(&self, bytes: &[u8]) -> StrataResult<BoxedPayload>;
}

/// An [`Exemplar`] for any serde-serializable value type.
///
/// The nil value is `T::default()`, deep copy is `Clone`, and the encoded
/// form is JSON.
pub struct JsonType<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonType<T> {
    /// Creates the exemplar.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonType<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn expect_payload<T: Any>(value: &(dyn Any + Send + Sync)) -> &T {
    value.downcast_ref::<T>().unwrap_or_else(|| {
        panic!(
            "payload type confusion: expected {}",
            std::any::type_name::<T>()
        )
    })
}

impl<T> Exemplar for JsonType<T>
where
    T: Any + Clone + Default + PartialEq + Send + Sync + Serialize + DeserializeOwned,
{
    fn nil_value(&self) -> BoxedPayload {
        Box::new(T::default())
    }

    fn deep_copy(&self, value: &(dyn Any + Send + Sync)) -> BoxedPayload {
        Box::new(expect_payload::<T>(value).clone())
    }

    fn is_nil(&self, value: &(dyn Any + Send + Sync)) -> bool {
        expect_payload::<T>(value) == &T::default()
    }

    fn encode(&self, value: &(dyn Any + Send + Sync)) -> StrataResult<Bytes> {
        serde_json::to_vec(expect_payload::<T>(value))
            .map(Bytes::from)
            .map_err(|err| StrataError::codec(std::any::type_name::<T>(), err.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> StrataResult<BoxedPayload> {
        serde_json::from_slice::<T>(bytes)
            .map(|value| Box::new(value) as BoxedPayload)
            .map_err(|err| StrataError::codec(std::any::type_name::<T>(), err.to_string()))
    }
}

/// A link declaration passed to type creation.
#[derive(Clone, Debug)]
pub struct LinkDef {
    /// The link name, unique per type.
    pub name: String,
    /// The type name link targets belong to.
    pub target_type: String,
}

impl LinkDef {
    /// Creates a link declaration.
    pub fn new(name: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_type: target_type.into(),
        }
    }
}

/// A registered type: schema plus exemplar. Immutable after registration.
pub struct TypeHandle {
    schema: TypeSchema,
    exemplar: Box<dyn Exemplar>,
}

impl TypeHandle {
    pub(crate) fn new(schema: TypeSchema, exemplar: Box<dyn Exemplar>) -> Self {
        Self { schema, exemplar }
    }

    /// The registered type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// The schema version tag.
    #[must_use]
    pub fn version(&self) -> u16 {
        self.schema.version
    }

    /// The backend-facing half of the descriptor.
    #[must_use]
    pub fn schema(&self) -> &TypeSchema {
        &self.schema
    }

    /// The declaration for a link name, if declared.
    #[must_use]
    pub fn link(&self, link_name: &str) -> Option<&LinkDecl> {
        self.schema.link(link_name)
    }

    /// Produces the type's nil value.
    #[must_use]
    pub fn nil_value(&self) -> BoxedPayload {
        self.exemplar.nil_value()
    }

    /// Deep-copies a payload of this type.
    #[must_use]
    pub fn deep_copy(&self, value: &(dyn Any + Send + Sync)) -> BoxedPayload {
        self.exemplar.deep_copy(value)
    }

    /// Tests a payload of this type for nil.
    #[must_use]
    pub fn is_nil(&self, value: &(dyn Any + Send + Sync)) -> bool {
        self.exemplar.is_nil(value)
    }

    /// Encodes a payload for the backend.
    pub fn encode(&self, value: &(dyn Any + Send + Sync)) -> StrataResult<Bytes> {
        self.exemplar.encode(value)
    }

    /// Decodes a backend payload.
    pub fn decode(&self, bytes: &[u8]) -> StrataResult<BoxedPayload> {
        self.exemplar.decode(bytes)
    }
}

impl fmt::Debug for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeHandle")
            .field("name", &self.schema.name)
            .field("version", &self.schema.version)
            .field("links", &self.schema.links)
            .finish()
    }
}

/// The per-database map of registered types. Registration is write-once;
/// two registrations of the same name are a defect in the calling code.
pub(crate) struct TypeRegistry {
    types: RwLock<HashMap<String, Arc<TypeHandle>>>,
}

impl TypeRegistry {
    pub(crate) fn new() -> Self {
        Self {
            types: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a type, panicking if `name` is already taken.
    ///
    /// Link tags are assigned in declaration order, starting at 1.
    pub(crate) fn register(
        &self,
        name: &str,
        version: u16,
        exemplar: Box<dyn Exemplar>,
        links: &[LinkDef],
    ) -> Arc<TypeHandle> {
        let mut types = self.types.write();
        if types.contains_key(name) {
            panic!("type already registered: '{name}'");
        }

        let mut schema = TypeSchema::new(name, version);
        for (index, def) in links.iter().enumerate() {
            schema.links.insert(
                def.name.clone(),
                LinkDecl {
                    target_type: def.target_type.clone(),
                    tag: (index + 1) as u16,
                },
            );
        }

        let handle = Arc::new(TypeHandle::new(schema, exemplar));
        types.insert(name.to_string(), Arc::clone(&handle));
        handle
    }

    /// Resolves a type by name, panicking on an unknown name.
    pub(crate) fn get(&self, name: &str) -> Arc<TypeHandle> {
        self.types
            .read()
            .get(name)
            .cloned()
            .unwrap_or_else(|| panic!("unknown type '{name}'"))
    }
}
