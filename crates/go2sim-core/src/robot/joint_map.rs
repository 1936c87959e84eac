//! Canonical joint order to backend handle mapping

use serde::{Deserialize, Serialize};

use super::{JOINT_NAMES, NUM_JOINTS};
use crate::{Error, Result};

/// Backend-specific joint identifier
///
/// What the number means is up to the backend: an engine joint index, a
/// degree-of-freedom slot in generalized coordinates, etc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JointHandle(pub usize);

/// Joint metadata reported by a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JointInfo {
    /// Backend handle
    pub handle: JointHandle,
    /// Joint name from the robot description
    pub name: String,
}

impl JointInfo {
    pub fn new(handle: usize, name: impl Into<String>) -> Self {
        Self {
            handle: JointHandle(handle),
            name: name.into(),
        }
    }
}

/// Anything that can enumerate its physical joints
pub trait JointCatalog {
    /// All physical joints, actuated or not, in backend order
    fn joint_infos(&self) -> Vec<JointInfo>;
}

/// Mapping from the canonical joint order to backend handles
///
/// Built once at startup and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JointMap {
    handles: [JointHandle; NUM_JOINTS],
}

impl JointMap {
    /// Resolve every canonical joint name against the backend
    ///
    /// Names are matched exactly. The first missing name aborts the build
    /// with [`Error::JointResolution`].
    pub fn build<C: JointCatalog + ?Sized>(catalog: &C) -> Result<Self> {
        let infos = catalog.joint_infos();
        let mut handles = [JointHandle(0); NUM_JOINTS];

        for (slot, name) in handles.iter_mut().zip(JOINT_NAMES.iter()) {
            let info = infos
                .iter()
                .find(|info| info.name == *name)
                .ok_or_else(|| Error::JointResolution((*name).to_string()))?;
            *slot = info.handle;
        }

        tracing::debug!("Resolved {} joints: {:?}", NUM_JOINTS, handles);
        Ok(Self { handles })
    }

    /// Handle of the joint at a canonical index
    #[inline]
    pub fn handle(&self, index: usize) -> JointHandle {
        self.handles[index]
    }

    /// All handles in canonical order
    #[inline]
    pub fn handles(&self) -> &[JointHandle; NUM_JOINTS] {
        &self.handles
    }

    /// Joint name at a canonical index
    #[inline]
    pub fn name(&self, index: usize) -> &'static str {
        JOINT_NAMES[index]
    }

    /// Iterate `(canonical index, name, handle)`
    pub fn iter(&self) -> impl Iterator<Item = (usize, &'static str, JointHandle)> + '_ {
        self.handles
            .iter()
            .enumerate()
            .map(|(i, &h)| (i, JOINT_NAMES[i], h))
    }
}
