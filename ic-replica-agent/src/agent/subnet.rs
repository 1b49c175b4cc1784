//! Information about subnets.
//!
//! Fetch subnet information via [`Agent::fetch_subnet_by_canister`](crate::Agent::fetch_subnet_by_canister)
//! or its cached counterpart [`Agent::get_subnet_by_canister`](crate::Agent::get_subnet_by_canister).

use candid::Principal;
use ic_certified_tree::PrincipalStep;
use rangemap::RangeInclusiveSet;
use std::{collections::HashMap, fmt, ops::RangeInclusive};

/// Information about a subnet, including its public key, member nodes, and assigned canister ranges.
///
/// Range information may be incomplete depending on how the subnet was fetched. The lack of a canister ID
/// within assigned ranges should not be treated immediately as an authorization failure without fetching
/// fresh data with [`Agent::fetch_subnet_by_canister`](crate::Agent::fetch_subnet_by_canister).
#[derive(Clone)]
pub struct Subnet {
    pub(crate) id: Principal,
    // Only the self-reported key; certificates are checked against the root key or a delegation.
    pub(crate) key: Vec<u8>,
    pub(crate) node_keys: HashMap<Principal, Vec<u8>>,
    pub(crate) canister_ranges: RangeInclusiveSet<Principal, PrincipalStep>,
}

impl fmt::Debug for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subnet")
            .field("id", &self.id)
            .field("nodes", &self.node_keys.len())
            .field("canister_ranges", &self.iter_canister_ranges().collect::<Vec<_>>())
            .finish()
    }
}

impl Subnet {
    /// Checks whether the given canister ID is contained within the subnet's assigned canister ranges.
    pub fn contains_canister(&self, canister_id: &Principal) -> bool {
        self.canister_ranges.contains(canister_id)
    }

    /// Returns an iterator over the known canister ID ranges assigned to this subnet.
    pub fn iter_canister_ranges(&self) -> impl Iterator<Item = RangeInclusive<Principal>> + '_ {
        self.canister_ranges.iter().cloned()
    }

    /// Returns the self-reported public key of the subnet.
    ///
    /// Note that this key is not authoritative if the subnet is rogue.
    pub fn self_reported_key(&self) -> &[u8] {
        &self.key
    }

    /// Checks whether the given node ID is a member of this subnet.
    pub fn contains_node(&self, node_id: &Principal) -> bool {
        self.node_keys.contains_key(node_id)
    }

    /// Returns the DER-encoded public key of the given node ID, if it is a member of this subnet.
    pub fn get_node_key(&self, node_id: &Principal) -> Option<&[u8]> {
        self.node_keys.get(node_id).map(|k| &k[..])
    }

    /// Returns an iterator over the nodes in this subnet.
    pub fn iter_nodes(&self) -> impl Iterator<Item = Principal> + '_ {
        self.node_keys.keys().copied()
    }

    /// Returns an iterator over the node IDs and their corresponding public keys in this subnet.
    pub fn iter_node_keys(&self) -> impl Iterator<Item = (Principal, &[u8])> + '_ {
        self.node_keys.iter().map(|(k, v)| (*k, &v[..]))
    }

    /// The number of nodes in this subnet.
    pub fn node_count(&self) -> usize {
        self.node_keys.len()
    }

    /// Returns the subnet's ID.
    pub fn id(&self) -> Principal {
        self.id
    }
}
