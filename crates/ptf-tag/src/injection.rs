//! ---
//! ptf_section: "02-identity-derivation"
//! ptf_subsection: "module"
//! ptf_type: "source"
//! ptf_scope: "code"
//! ptf_description: "Deterministic case identities and derived values."
//! ptf_version: "v0.0.0-prealpha"
//! ptf_owner: "tbd"
//! ---
//! Constructor-argument injection of per-case tags.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use ptf_common::Result;

use crate::tag::Tag;

/// One argument passed to a case's fixture constructor.
#[derive(Clone)]
pub enum ConstructorArg {
    /// A slot declared as a [`Tag`]; `None` until [`inject_tag`] fills it.
    Tag(Option<Tag>),
    /// Any other host-supplied value.
    Value(Arc<dyn Any + Send + Sync>),
}

impl ConstructorArg {
    /// An unfilled tag slot.
    pub fn tag_slot() -> Self {
        ConstructorArg::Tag(None)
    }

    /// Wrap an arbitrary value.
    pub fn value<T: Any + Send + Sync>(value: T) -> Self {
        ConstructorArg::Value(Arc::new(value))
    }

    /// The injected tag, if this is a filled tag slot.
    pub fn as_tag(&self) -> Option<&Tag> {
        match self {
            ConstructorArg::Tag(tag) => tag.as_ref(),
            ConstructorArg::Value(_) => None,
        }
    }

    /// Borrow a wrapped value as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            ConstructorArg::Value(value) => value.downcast_ref::<T>(),
            ConstructorArg::Tag(_) => None,
        }
    }
}

impl fmt::Debug for ConstructorArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstructorArg::Tag(tag) => f.debug_tuple("Tag").field(tag).finish(),
            ConstructorArg::Value(_) => f.write_str("Value(..)"),
        }
    }
}

/// Fill every tag slot in `args` with a fresh root tag seeded by the case's
/// unique id.
///
/// Returns the injected tag, or `None` when no slot is declared. An empty
/// unique id is rejected like any other blank seed.
pub fn inject_tag(args: &mut [ConstructorArg], unique_id: &str) -> Result<Option<Tag>> {
    if !args.iter().any(|arg| matches!(arg, ConstructorArg::Tag(_))) {
        return Ok(None);
    }
    let tag = Tag::from_seed(unique_id)?;
    for arg in args.iter_mut() {
        if let ConstructorArg::Tag(slot) = arg {
            *slot = Some(tag.clone());
        }
    }
    Ok(Some(tag))
}
