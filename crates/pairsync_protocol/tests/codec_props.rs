//! Property tests for the CBOR wire format.

use pairsync_core::{SyncObject, SyncObjectStatus, SyncRequest, Timestamp};
use pairsync_protocol::{Envelope, PeerRequest};
use proptest::prelude::*;
use uuid::Uuid;

fn status() -> impl Strategy<Value = SyncObjectStatus> {
    prop_oneof![
        Just(SyncObjectStatus::Added),
        Just(SyncObjectStatus::Modified),
        Just(SyncObjectStatus::Deleted),
        Just(SyncObjectStatus::EntityDeleted),
    ]
}

fn object() -> impl Strategy<Value = SyncObject> {
    ("[A-Z][a-z]{1,12}", any::<u128>(), ".{0,64}", status()).prop_map(
        |(type_name, id, payload, status)| {
            SyncObject::new(type_name, Uuid::from_u128(id), payload, status)
        },
    )
}

proptest! {
    #[test]
    fn apply_batches_survive_the_wire(
        objects in prop::collection::vec(object(), 0..20),
        since in any::<i64>(),
        skip in 0usize..10_000,
    ) {
        let session_id = Uuid::new_v4();
        let mut request = SyncRequest::apply(Timestamp::from_micros(since), Timestamp::MAX, objects.clone());
        request.skip = skip;
        let envelope = Envelope::new(Uuid::new_v4(), PeerRequest::ApplyChanges { session_id, request });

        let bytes = envelope.encode().unwrap();
        let decoded = Envelope::<PeerRequest>::decode(&bytes).unwrap();

        match decoded.message {
            PeerRequest::ApplyChanges { session_id: id, request } => {
                prop_assert_eq!(id, session_id);
                prop_assert_eq!(request.since, Timestamp::from_micros(since));
                prop_assert_eq!(request.skip, skip);
                prop_assert_eq!(request.collection, objects);
            }
            other => prop_assert!(false, "unexpected variant {}", other.operation()),
        }
    }
}
