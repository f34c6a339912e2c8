//! Ways to reach a target object
//!
//! A [`ContactInfo`] is one endpoint taken from one profile of an object
//! reference, together with the addressing mode requests to it should use.
//! Equality and hashing look at the endpoint only, so every contact info for
//! the same host and port shares one pooled outbound connection.

mod list;
mod sticky;

pub use list::{ContactInfoIterator, ContactInfoList, ReportOutcome};
pub use sticky::StickyFailoverTable;

use crate::endpoint::Endpoint;
use bytes::Bytes;
use giop::{AddressingDisposition, IiopProfile, Ior, TargetAddress, Version};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Clone)]
pub struct ContactInfo {
    endpoint: Endpoint,
    disposition: AddressingDisposition,
    profile_index: usize,
    profile: Arc<IiopProfile>,
    reference: Arc<Ior>,
}

impl ContactInfo {
    pub fn new(
        endpoint: Endpoint,
        profile_index: usize,
        profile: Arc<IiopProfile>,
        reference: Arc<Ior>,
    ) -> Self {
        Self {
            endpoint,
            disposition: AddressingDisposition::Key,
            profile_index,
            profile,
            reference,
        }
    }

    /// Every contact info of `reference`: per IIOP profile, the primary
    /// address followed by its alternates
    pub fn from_reference(reference: &Arc<Ior>) -> Vec<ContactInfo> {
        reference
            .iiop_profiles()
            .enumerate()
            .flat_map(|(index, profile)| {
                let shared = Arc::new(profile.clone());
                profile
                    .addresses()
                    .map(|address| {
                        ContactInfo::new(Endpoint::from(address), index, shared.clone(), reference.clone())
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn with_disposition(&self, disposition: AddressingDisposition) -> Self {
        Self {
            disposition,
            ..self.clone()
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn disposition(&self) -> AddressingDisposition {
        self.disposition
    }

    pub fn object_key(&self) -> &Bytes {
        &self.profile.object_key
    }

    pub fn version(&self) -> Version {
        self.profile.version
    }

    pub fn profile_index(&self) -> usize {
        self.profile_index
    }

    pub fn reference(&self) -> &Arc<Ior> {
        &self.reference
    }

    /// Request target in this contact info's addressing mode
    pub fn target_address(&self) -> TargetAddress {
        match self.disposition {
            AddressingDisposition::Key => TargetAddress::Key(self.profile.object_key.clone()),
            AddressingDisposition::Profile => TargetAddress::Profile((*self.profile).clone()),
            AddressingDisposition::Reference => TargetAddress::Reference {
                selected_profile: self.profile_index as u32,
                ior: (*self.reference).clone(),
            },
        }
    }
}

impl PartialEq for ContactInfo {
    fn eq(&self, other: &Self) -> bool {
        self.endpoint == other.endpoint
    }
}

impl Eq for ContactInfo {}

impl Hash for ContactInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.endpoint.hash(state);
    }
}

impl fmt::Debug for ContactInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContactInfo")
            .field("endpoint", &self.endpoint.to_string())
            .field("disposition", &self.disposition)
            .field("profile", &self.profile_index)
            .finish()
    }
}

impl fmt::Display for ContactInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.endpoint.fmt(f)
    }
}
