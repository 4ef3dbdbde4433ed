use rand::RngCore;
use reactor_domain::{EndpointKey, ManagerId};
use sha2::{Digest, Sha256};

/// A 128-bit slot on the ownership ring. Manager-published "virtual nodes"
/// and endpoint keys are both hashed into this space so owner lookup is a
/// single binary search.
pub type VirtualKey = u128;

fn u128_from_digest(bytes: &[u8]) -> u128 {
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&bytes[..16]);
    u128::from_be_bytes(buf)
}

/// Hash an endpoint key (itself already a stable hash of the endpoint's URL,
/// see [`reactor_domain::EndpointKey::from_url`]) into ring space.
pub fn hash_endpoint_key(key: &EndpointKey) -> VirtualKey {
    let digest = Sha256::digest(key.as_str().as_bytes());
    u128_from_digest(&digest)
}

/// Generate `count` random virtual-node keys for a manager to publish on
/// join. Grounded in `manager_register`'s `hashlib.md5(str(uuid.uuid4()))`:
/// hash fresh random bytes rather than publish raw randomness, so the key
/// space distribution doesn't depend on the RNG's own bit distribution.
pub fn generate_virtual_keys(count: u32) -> Vec<VirtualKey> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let mut raw = [0u8; 32];
            rng.fill_bytes(&mut raw);
            let digest = Sha256::digest(raw);
            u128_from_digest(&digest)
        })
        .collect()
}

/// A sorted consistent-hashing wheel of `(virtual key, owning manager)`
/// pairs, rebuilt from scratch whenever the set of managers or their
/// published keys changes.
#[derive(Debug, Clone, Default)]
pub struct Ring {
    entries: Vec<(VirtualKey, ManagerId)>,
}

impl Ring {
    /// Build a ring from every manager's currently published virtual keys.
    /// `members` need not be deduplicated or pre-sorted.
    pub fn build(members: impl IntoIterator<Item = (ManagerId, Vec<VirtualKey>)>) -> Self {
        let mut entries: Vec<(VirtualKey, ManagerId)> = members
            .into_iter()
            .flat_map(|(id, keys)| keys.into_iter().map(move |k| (k, id.clone())))
            .collect();
        // Ties at equal keys are broken by lexicographic UUID (spec §4.1).
        entries.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.0.cmp(&b.1.0)));
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Binary-search for the first virtual key ≥ `endpoint_key`; wrap to
    /// index 0 if none is found. Two managers observing the same ring
    /// always compute the same owner.
    pub fn owner_of(&self, endpoint_key: &EndpointKey) -> Option<ManagerId> {
        if self.entries.is_empty() {
            return None;
        }
        let target = hash_endpoint_key(endpoint_key);
        let index = match self.entries.binary_search_by(|(k, _)| k.cmp(&target)) {
            Ok(i) => i,
            Err(i) => i % self.entries.len(),
        };
        Some(self.entries[index].1.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mgr(b: u8) -> ManagerId {
        ManagerId(uuid::Uuid::from_bytes([b; 16]))
    }

    #[test]
    fn owner_of_wraps_around_to_lowest_key() {
        let ring = Ring::build(vec![(mgr(1), vec![10]), (mgr(2), vec![20])]);
        // An endpoint key hashing above every virtual key must wrap to the
        // lowest one (index 0) rather than returning None.
        let owner = ring.owner_of(&EndpointKey("zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz".to_string()));
        assert!(owner.is_some());
    }

    #[test]
    fn two_rings_built_from_the_same_membership_agree() {
        let members = vec![(mgr(1), vec![5, 50]), (mgr(2), vec![25, 75])];
        let ring_a = Ring::build(members.clone());
        let ring_b = Ring::build(members);

        let key = EndpointKey::from_url("https://example.com/svc");
        assert_eq!(ring_a.owner_of(&key), ring_b.owner_of(&key));
    }

    #[test]
    fn empty_ring_has_no_owner() {
        let ring = Ring::default();
        assert_eq!(ring.owner_of(&EndpointKey::from_url("https://x/")), None);
    }

    #[test]
    fn tie_at_equal_virtual_keys_breaks_lexicographically() {
        let ring = Ring::build(vec![(mgr(9), vec![100]), (mgr(1), vec![100])]);
        // Both managers published the same virtual key (collision); the
        // lower UUID wins the tie.
        assert_eq!(ring.entries[0].1, mgr(1));
        assert_eq!(ring.entries[1].1, mgr(9));
    }

    #[test]
    fn generated_virtual_keys_are_distinct() {
        let keys = generate_virtual_keys(32);
        assert_eq!(keys.len(), 32);
        let unique: std::collections::HashSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), 32);
    }
}
