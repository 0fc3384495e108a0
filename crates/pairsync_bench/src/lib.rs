//! Benchmark utilities.

use pairsync_core::{SyncObject, SyncObjectStatus, Timestamp};
use pairsync_testkit::{Address, Person, TestPeer};
use rand::Rng;

const CITIES: [&str; 5] = [
    "Springfield",
    "Shelbyville",
    "Ogdenville",
    "Brockway",
    "Capital City",
];

/// Generate a random street line.
pub fn random_line() -> String {
    let mut rng = rand::thread_rng();
    format!("{} Main St", rng.gen_range(1..10_000))
}

/// Generate a random city.
pub fn random_city() -> &'static str {
    let mut rng = rand::thread_rng();
    CITIES[rng.gen_range(0..CITIES.len())]
}

/// Fill `peer` with addresses, each with `people_per_address` residents.
pub fn seed(peer: &TestPeer, addresses: usize, people_per_address: usize) {
    for a in 0..addresses {
        let home = peer.insert(Address::new(random_line(), random_city(), peer.now()));
        for p in 0..people_per_address {
            peer.insert(Person::new(format!("Person {a}-{p}"), &home, peer.now()));
        }
    }
}

/// Generate address change objects.
pub fn address_objects(count: usize) -> Vec<SyncObject> {
    (0..count)
        .filter_map(|_| {
            let address = Address::new(random_line(), random_city(), Timestamp::from_micros(1));
            SyncObject::from_entity(&address, SyncObjectStatus::Added).ok()
        })
        .collect()
}
