//! Point-in-time copy of an inventory store and the mutations applied to it.
//!
//! Both built-in drivers keep their authoritative state as an
//! [`InventorySnapshot`], and backend instances use the same type as their
//! local cache, so membership rules live in exactly one place: a host belongs
//! to at most one cloud, and a cloud's member set is always the set of hosts
//! assigned to it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{
    Attributes, Cloud, CloudAssignment, CloudId, CloudPatch, Host, HostId, HostPatch,
    VersionToken,
};
use crate::backend::{BackendError, Resource};

/// A change to inventory state, applied locally or pushed to a backend.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Mutation {
    /// Registers a new host.
    AddHost {
        /// Host to create.
        host: HostId,
        /// Initial attributes.
        attributes: Attributes,
        /// Initial assignment.
        cloud: CloudAssignment,
    },
    /// Registers a new, empty cloud.
    AddCloud {
        /// Cloud to create.
        cloud: CloudId,
        /// Initial description.
        description: String,
    },
    /// Patches a host.
    UpdateHost {
        /// Host to patch.
        host: HostId,
        /// Changes to apply.
        patch: HostPatch,
    },
    /// Patches a cloud.
    UpdateCloud {
        /// Cloud to patch.
        cloud: CloudId,
        /// Changes to apply.
        patch: CloudPatch,
    },
    /// Removes a host; absent hosts are ignored.
    RemoveHost {
        /// Host to remove.
        host: HostId,
    },
    /// Removes a cloud, detaching members first when forced.
    RemoveCloud {
        /// Cloud to remove.
        cloud: CloudId,
        /// Detach members instead of refusing.
        force: bool,
    },
}

impl Mutation {
    /// Short description used as error context.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::AddHost { host, .. } => format!("add host {host}"),
            Self::AddCloud { cloud, .. } => format!("add cloud {cloud}"),
            Self::UpdateHost { host, .. } => format!("update host {host}"),
            Self::UpdateCloud { cloud, .. } => format!("update cloud {cloud}"),
            Self::RemoveHost { host } => format!("remove host {host}"),
            Self::RemoveCloud { cloud, .. } => format!("remove cloud {cloud}"),
        }
    }
}

/// Hosts and clouds of one store, stamped with the store's version.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct InventorySnapshot {
    /// Version of the store this snapshot was taken from.
    pub version: VersionToken,
    #[serde(default)]
    hosts: BTreeMap<HostId, Host>,
    #[serde(default)]
    clouds: BTreeMap<CloudId, Cloud>,
}

impl InventorySnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn empty(version: VersionToken) -> Self {
        Self {
            version,
            hosts: BTreeMap::new(),
            clouds: BTreeMap::new(),
        }
    }

    /// Iterates over hosts in identifier order.
    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    /// Iterates over clouds in identifier order.
    pub fn clouds(&self) -> impl Iterator<Item = &Cloud> {
        self.clouds.values()
    }

    /// Looks up a host.
    #[must_use]
    pub fn host(&self, id: &HostId) -> Option<&Host> {
        self.hosts.get(id)
    }

    /// Looks up a cloud.
    #[must_use]
    pub fn cloud(&self, id: &CloudId) -> Option<&Cloud> {
        self.clouds.get(id)
    }

    /// Returns `true` when the snapshot holds no hosts and no clouds.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.clouds.is_empty()
    }

    /// Applies a mutation, leaving the snapshot untouched on error.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NotFound`] when the target (or the cloud a
    /// host is assigned to) does not exist, and [`BackendError::Conflict`]
    /// on duplicate creation, revision mismatch, or removal of a populated
    /// cloud without force.
    pub fn apply(&mut self, mutation: &Mutation) -> Result<(), BackendError> {
        match mutation {
            Mutation::AddHost {
                host,
                attributes,
                cloud,
            } => self.add_host(host, attributes, cloud),
            Mutation::AddCloud { cloud, description } => self.add_cloud(cloud, description),
            Mutation::UpdateHost { host, patch } => self.update_host(host, patch),
            Mutation::UpdateCloud { cloud, patch } => self.update_cloud(cloud, patch),
            Mutation::RemoveHost { host } => {
                self.forget_host(host);
                Ok(())
            }
            Mutation::RemoveCloud { cloud, force } => self.remove_cloud(cloud, *force),
        }
    }

    /// Replaces a host with a record confirmed by a backend.
    ///
    /// Membership follows the record's assignment; an assignment naming a
    /// cloud this snapshot does not know is kept on the host only.
    pub fn put_host(&mut self, host: Host) {
        self.detach(&host.id);
        if let Some(cloud) = host.cloud.cloud().and_then(|id| self.clouds.get_mut(id)) {
            cloud.hosts.insert(host.id.clone());
        }
        self.hosts.insert(host.id.clone(), host);
    }

    /// Replaces a cloud's metadata with a record confirmed by a backend.
    /// Membership stays derived from local host assignments.
    pub fn put_cloud(&mut self, mut cloud: Cloud) {
        cloud.hosts = self
            .hosts
            .values()
            .filter(|host| host.cloud.is(&cloud.id))
            .map(|host| host.id.clone())
            .collect();
        self.clouds.insert(cloud.id.clone(), cloud);
    }

    /// Drops a host if present.
    pub fn forget_host(&mut self, id: &HostId) {
        self.detach(id);
        self.hosts.remove(id);
    }

    /// Drops a cloud if present, returning its members to the free pool.
    pub fn forget_cloud(&mut self, id: &CloudId) {
        let Some(cloud) = self.clouds.remove(id) else {
            return;
        };
        for member in &cloud.hosts {
            if let Some(host) = self.hosts.get_mut(member) {
                host.cloud = CloudAssignment::Unassigned;
                host.revision += 1;
            }
        }
    }

    fn add_host(
        &mut self,
        id: &HostId,
        attributes: &Attributes,
        assignment: &CloudAssignment,
    ) -> Result<(), BackendError> {
        if self.hosts.contains_key(id) {
            return Err(BackendError::conflict(
                Resource::Host(id.clone()),
                "host already exists",
            ));
        }
        self.require_assignable(assignment)?;
        self.put_host(Host {
            id: id.clone(),
            attributes: attributes.clone(),
            cloud: assignment.clone(),
            revision: 1,
        });
        Ok(())
    }

    fn add_cloud(&mut self, id: &CloudId, description: &str) -> Result<(), BackendError> {
        if self.clouds.contains_key(id) {
            return Err(BackendError::conflict(
                Resource::Cloud(id.clone()),
                "cloud already exists",
            ));
        }
        let mut cloud = Cloud::new(id.clone(), description);
        cloud.revision = 1;
        self.clouds.insert(id.clone(), cloud);
        Ok(())
    }

    fn update_host(&mut self, id: &HostId, patch: &HostPatch) -> Result<(), BackendError> {
        let current = self
            .hosts
            .get(id)
            .ok_or_else(|| BackendError::host_not_found(id))?;
        check_revision(Resource::Host(id.clone()), current.revision, patch.expected_revision)?;
        if let Some(assignment) = &patch.cloud {
            self.require_assignable(assignment)?;
        }

        let mut updated = current.clone();
        for key in &patch.unset {
            updated.attributes.remove(key);
        }
        updated
            .attributes
            .extend(patch.set.iter().map(|(key, value)| (key.clone(), value.clone())));
        if let Some(assignment) = &patch.cloud {
            updated.cloud = assignment.clone();
        }
        updated.revision += 1;
        self.put_host(updated);
        Ok(())
    }

    fn update_cloud(&mut self, id: &CloudId, patch: &CloudPatch) -> Result<(), BackendError> {
        let cloud = self
            .clouds
            .get_mut(id)
            .ok_or_else(|| BackendError::cloud_not_found(id))?;
        check_revision(Resource::Cloud(id.clone()), cloud.revision, patch.expected_revision)?;
        if let Some(description) = &patch.description {
            cloud.description.clone_from(description);
        }
        cloud.revision += 1;
        Ok(())
    }

    fn remove_cloud(&mut self, id: &CloudId, force: bool) -> Result<(), BackendError> {
        let cloud = self
            .clouds
            .get(id)
            .ok_or_else(|| BackendError::cloud_not_found(id))?;
        if !cloud.hosts.is_empty() && !force {
            return Err(BackendError::conflict(
                Resource::Cloud(id.clone()),
                format!(
                    "cloud still has {} member host(s); remove with force to detach them",
                    cloud.hosts.len()
                ),
            ));
        }
        self.forget_cloud(id);
        Ok(())
    }

    fn require_assignable(&self, assignment: &CloudAssignment) -> Result<(), BackendError> {
        match assignment.cloud() {
            Some(cloud) if !self.clouds.contains_key(cloud) => {
                Err(BackendError::cloud_not_found(cloud))
            }
            _ => Ok(()),
        }
    }

    fn detach(&mut self, id: &HostId) {
        let Some(previous) = self.hosts.get(id).and_then(|host| host.cloud.cloud()) else {
            return;
        };
        if let Some(cloud) = self.clouds.get_mut(previous) {
            cloud.hosts.remove(id);
        }
    }
}

fn check_revision(
    resource: Resource,
    current: u64,
    expected: Option<u64>,
) -> Result<(), BackendError> {
    match expected {
        Some(expected) if expected != current => Err(BackendError::conflict(
            resource,
            format!("expected revision {expected}, found {current}"),
        )),
        _ => Ok(()),
    }
}
