use std::sync::Arc;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// Minimum number of signers required for a quorum of `n` validators.
pub fn quorum_size(n: usize) -> usize {
    n * 2 / 3 + 1
}

/// Maximum number of faulty validators tolerated among `n`.
pub fn fault_tolerance(n: usize) -> usize {
    n.saturating_sub(1) / 3
}

/// An ordered set of validator addresses.
///
/// Addresses are kept sorted by their bytes and free of duplicates, which
/// gives every node the same iteration order for proposer selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<Address>", into = "Vec<Address>")]
pub struct ValidatorSet {
    validators: Arc<[Address]>,
}

impl ValidatorSet {
    pub fn new<I>(it: I) -> Self
    where
        I: IntoIterator<Item = Address>,
    {
        let mut v: Vec<Address> = it.into_iter().collect();
        v.sort();
        v.dedup();
        Self {
            validators: v.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn contains(&self, a: &Address) -> bool {
        self.validators.binary_search(a).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.validators.iter()
    }

    pub fn as_slice(&self) -> &[Address] {
        &self.validators
    }

    pub fn quorum_size(&self) -> usize {
        quorum_size(self.len())
    }

    pub fn fault_tolerance(&self) -> usize {
        fault_tolerance(self.len())
    }

    /// The proposer at `(sequence + round) mod n`.
    ///
    /// Returns `None` for an empty set.
    pub fn proposer(&self, sequence: u64, round: u32) -> Option<Address> {
        let n = self.validators.len() as u64;
        if n == 0 {
            return None;
        }
        let i = (sequence % n + u64::from(round) % n) % n;
        Some(self.validators[i as usize])
    }
}

impl FromIterator<Address> for ValidatorSet {
    fn from_iter<T: IntoIterator<Item = Address>>(iter: T) -> Self {
        Self::new(iter)
    }
}

impl From<Vec<Address>> for ValidatorSet {
    fn from(v: Vec<Address>) -> Self {
        Self::new(v)
    }
}

impl From<ValidatorSet> for Vec<Address> {
    fn from(s: ValidatorSet) -> Self {
        s.validators.to_vec()
    }
}

impl<'a> IntoIterator for &'a ValidatorSet {
    type Item = &'a Address;
    type IntoIter = std::slice::Iter<'a, Address>;

    fn into_iter(self) -> Self::IntoIter {
        self.validators.iter()
    }
}
