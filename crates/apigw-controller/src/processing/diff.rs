//! Key-based diff between desired and actual resources
//!
//! Desired resources are keyed by semantic identity. Each actual resource is
//! matched by the key derived from its own content:
//!
//! - key still desired and not yet claimed: **Update** (desired spec, labels
//!   and owner references copied onto the existing object, name and version
//!   kept)
//! - key not desired, or already claimed by an earlier duplicate: **Delete**
//! - desired keys nobody claimed: **Create**

use std::collections::BTreeMap;

use apigw_common::resources::ManagedResource;
use apigw_common::OwnerLabels;

/// One change to apply to the cluster
#[derive(Clone, Debug, PartialEq)]
pub enum Change<T> {
    /// Create a new resource
    Create(T),
    /// Replace the spec of an existing resource
    Update(T),
    /// Delete an existing resource
    Delete(T),
}

impl<T> Change<T> {
    /// The resource this change applies to
    pub fn resource(&self) -> &T {
        match self {
            Change::Create(r) | Change::Update(r) | Change::Delete(r) => r,
        }
    }

    /// Short verb for logs
    pub fn verb(&self) -> &'static str {
        match self {
            Change::Create(_) => "create",
            Change::Update(_) => "update",
            Change::Delete(_) => "delete",
        }
    }
}

/// Compute the changes turning `actual` into `desired`.
///
/// `key` must derive the same key from an actual resource that the builder
/// used for the equivalent desired one.
pub fn diff<T, K>(
    mut desired: BTreeMap<String, T>,
    actual: Vec<T>,
    key: K,
    owner: &OwnerLabels,
) -> Vec<Change<T>>
where
    T: ManagedResource,
    K: Fn(&T) -> String,
{
    let mut changes = Vec::with_capacity(desired.len() + actual.len());

    for mut existing in actual {
        match desired.remove(&key(&existing)) {
            Some(wanted) => {
                existing.set_spec(wanted.spec().clone());
                let meta = existing.metadata_mut();
                owner.adopt(&mut meta.labels);
                meta.labels.extend(wanted.metadata().labels.clone());
                meta.owner_references = wanted.metadata().owner_references.clone();
                changes.push(Change::Update(existing));
            }
            None => changes.push(Change::Delete(existing)),
        }
    }

    changes.extend(desired.into_values().map(Change::Create));
    changes
}
