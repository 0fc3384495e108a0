//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random edits to a [`TestPeer`] and
//! random change objects.

use crate::fixtures::{Address, Person};
use crate::harness::TestPeer;
use pairsync_core::{SyncObject, SyncObjectStatus};
use proptest::prelude::*;
use uuid::Uuid;

/// Strategy for generating sync ids.
pub fn sync_id_strategy() -> impl Strategy<Value = Uuid> {
    any::<u128>().prop_map(Uuid::from_u128)
}

/// Strategy for generating address lines.
pub fn line_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[1-9][0-9]{0,2} [A-Z][a-z]{2,8} (St|Rd|Ave)")
        .expect("Invalid regex")
}

/// Strategy for generating city names.
pub fn city_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{3,10}").expect("Invalid regex")
}

/// Strategy for generating person names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{2,8} [A-Z][a-z]{2,10}").expect("Invalid regex")
}

/// One local edit to a peer's store.
///
/// Indexes pick among the records that exist when the edit is applied and
/// wrap around; edits that find nothing to act on are skipped.
#[derive(Debug, Clone)]
pub enum Edit {
    /// Insert an address.
    AddAddress {
        /// First line.
        line1: String,
        /// City.
        city: String,
    },
    /// Change the city of an address.
    SetCity {
        /// Which address.
        index: usize,
        /// New city.
        city: String,
    },
    /// Link one address to another.
    Link {
        /// Which address.
        from: usize,
        /// Which target.
        to: usize,
    },
    /// Insert a person at an address.
    AddPerson {
        /// Name.
        name: String,
        /// Which address.
        address: usize,
    },
    /// Rename a person.
    Rename {
        /// Which person.
        index: usize,
        /// New name.
        name: String,
    },
    /// Soft-delete a person.
    DeletePerson {
        /// Which person.
        index: usize,
    },
}

impl Edit {
    /// Applies the edit to `peer`. Returns false if it was skipped.
    pub fn apply(&self, peer: &TestPeer) -> bool {
        let addresses = peer.all::<Address>();
        let people = peer.all::<Person>();
        match self {
            Edit::AddAddress { line1, city } => {
                peer.insert(Address::new(line1.clone(), city.clone(), peer.now()));
            }
            Edit::SetCity { index, city } => {
                let Some(mut address) = pick(&addresses, *index) else {
                    return false;
                };
                address.set_city(city.clone(), peer.now());
                peer.update(address);
            }
            Edit::Link { from, to } => {
                let (Some(mut from), Some(to)) = (pick(&addresses, *from), pick(&addresses, *to))
                else {
                    return false;
                };
                from.link_to(&to, peer.now());
                peer.update(from);
            }
            Edit::AddPerson { name, address } => {
                let Some(address) = pick(&addresses, *address) else {
                    return false;
                };
                peer.insert(Person::new(name.clone(), &address, peer.now()));
            }
            Edit::Rename { index, name } => {
                let Some(mut person) = pick(&people, *index) else {
                    return false;
                };
                person.set_name(name.clone(), peer.now());
                peer.update(person);
            }
            Edit::DeletePerson { index } => {
                let Some(mut person) = pick(&people, *index) else {
                    return false;
                };
                person.delete(peer.now());
                peer.update(person);
            }
        }
        true
    }
}

fn pick<T: Clone>(rows: &[T], index: usize) -> Option<T> {
    if rows.is_empty() {
        None
    } else {
        Some(rows[index % rows.len()].clone())
    }
}

/// Strategy for generating one edit.
pub fn edit_strategy() -> impl Strategy<Value = Edit> {
    prop_oneof![
        3 => (line_strategy(), city_strategy())
            .prop_map(|(line1, city)| Edit::AddAddress { line1, city }),
        2 => (any::<usize>(), city_strategy())
            .prop_map(|(index, city)| Edit::SetCity { index, city }),
        1 => (any::<usize>(), any::<usize>()).prop_map(|(from, to)| Edit::Link { from, to }),
        2 => (name_strategy(), any::<usize>())
            .prop_map(|(name, address)| Edit::AddPerson { name, address }),
        1 => (any::<usize>(), name_strategy())
            .prop_map(|(index, name)| Edit::Rename { index, name }),
        1 => any::<usize>().prop_map(|index| Edit::DeletePerson { index }),
    ]
}

/// Strategy for generating a sequence of edits.
pub fn edit_sequence_strategy(min: usize, max: usize) -> impl Strategy<Value = Vec<Edit>> {
    prop::collection::vec(edit_strategy(), min..max)
}

/// Strategy for generating address change objects.
pub fn address_object_strategy() -> impl Strategy<Value = SyncObject> {
    (line_strategy(), city_strategy(), any::<bool>()).prop_map(|(line1, city, added)| {
        let address = Address::new(line1, city, pairsync_core::Timestamp::from_micros(1));
        let status = if added {
            SyncObjectStatus::Added
        } else {
            SyncObjectStatus::Modified
        };
        SyncObject::from_entity(&address, status).expect("addresses serialize")
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
