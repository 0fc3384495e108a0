//! Sample entity model used across tests, benches and the CLI.
//!
//! - `Address` may link to another `Address` (optional self reference)
//! - `Person` requires an `Address`
//! - `LogEvent` is immutable once written

use pairsync_core::{
    FieldMerger, FieldStamps, LocalId, Relationship, SyncEntity, Timestamp,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A postal address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    /// Local primary key.
    pub id: Option<LocalId>,
    /// Global id.
    pub sync_id: Uuid,
    /// First address line.
    pub line1: String,
    /// City.
    pub city: String,
    /// Local id of a linked address.
    pub linked_address_id: Option<LocalId>,
    /// Global id of a linked address.
    pub linked_address_sync_id: Option<Uuid>,
    /// Creation time.
    pub created_on: Timestamp,
    /// Time of the last change.
    pub modified_on: Timestamp,
    /// Soft-delete flag.
    pub deleted: bool,
    /// Per-field write times.
    #[serde(default)]
    pub stamps: FieldStamps,
}

impl Address {
    /// Creates an address written at `at`.
    pub fn new(line1: impl Into<String>, city: impl Into<String>, at: Timestamp) -> Self {
        Self {
            id: None,
            sync_id: Uuid::new_v4(),
            line1: line1.into(),
            city: city.into(),
            linked_address_id: None,
            linked_address_sync_id: None,
            created_on: at,
            modified_on: at,
            deleted: false,
            stamps: FieldStamps::new(),
        }
    }

    /// Changes the first line.
    pub fn set_line1(&mut self, line1: impl Into<String>, at: Timestamp) {
        self.line1 = line1.into();
        self.touch("line1", at);
    }

    /// Changes the city.
    pub fn set_city(&mut self, city: impl Into<String>, at: Timestamp) {
        self.city = city.into();
        self.touch("city", at);
    }

    /// Links this address to `other`, which must be saved in the same store.
    pub fn link_to(&mut self, other: &Address, at: Timestamp) {
        self.linked_address_id = other.id;
        self.linked_address_sync_id = Some(other.sync_id);
        self.touch("linked_address", at);
    }

    /// Marks the address deleted.
    pub fn delete(&mut self, at: Timestamp) {
        self.deleted = true;
        self.touch("deleted", at);
    }

    fn touch(&mut self, field: &str, at: Timestamp) {
        self.stamps.touch(field, at);
        self.modified_on = self.modified_on.max(at);
    }
}

impl SyncEntity for Address {
    const TYPE_NAME: &'static str = "Address";
    const DEPENDS_ON: &'static [&'static str] = &["Address"];

    fn sync_id(&self) -> Uuid {
        self.sync_id
    }

    fn set_sync_id(&mut self, sync_id: Uuid) {
        self.sync_id = sync_id;
    }

    fn local_id(&self) -> Option<LocalId> {
        self.id
    }

    fn set_local_id(&mut self, local_id: Option<LocalId>) {
        self.id = local_id;
    }

    fn created_on(&self) -> Timestamp {
        self.created_on
    }

    fn modified_on(&self) -> Timestamp {
        self.modified_on
    }

    fn set_modified_on(&mut self, modified_on: Timestamp) {
        self.modified_on = modified_on;
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn relationships(&self) -> Vec<Relationship> {
        vec![Relationship::optional(
            "linked_address",
            Self::TYPE_NAME,
            self.linked_address_id,
            self.linked_address_sync_id,
        )]
    }

    fn set_relationship(&mut self, field: &str, local_id: Option<LocalId>, sync_id: Option<Uuid>) {
        if field == "linked_address" {
            self.linked_address_id = local_id;
            self.linked_address_sync_id = sync_id;
        }
    }

    fn merge(&mut self, update: &Self, exclusions: &[&str]) -> bool {
        let mut merger = FieldMerger::new(
            &self.stamps,
            self.created_on,
            &update.stamps,
            update.created_on,
            exclusions,
        );
        merger.field("line1", &mut self.line1, &update.line1);
        merger.field("city", &mut self.city, &update.city);
        let mut linked = (self.linked_address_id, self.linked_address_sync_id);
        merger.field(
            "linked_address",
            &mut linked,
            &(update.linked_address_id, update.linked_address_sync_id),
        );
        (self.linked_address_id, self.linked_address_sync_id) = linked;
        merger.field("deleted", &mut self.deleted, &update.deleted);

        let (changed, stamps) = merger.finish();
        self.stamps = stamps;
        changed
    }
}

/// A person living at an address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    /// Local primary key.
    pub id: Option<LocalId>,
    /// Global id.
    pub sync_id: Uuid,
    /// Full name.
    pub name: String,
    /// Local id of the address.
    pub address_id: Option<LocalId>,
    /// Global id of the address.
    pub address_sync_id: Option<Uuid>,
    /// Creation time.
    pub created_on: Timestamp,
    /// Time of the last change.
    pub modified_on: Timestamp,
    /// Soft-delete flag.
    pub deleted: bool,
    /// Per-field write times.
    #[serde(default)]
    pub stamps: FieldStamps,
}

impl Person {
    /// Creates a person living at `address`, which must be saved in the
    /// same store.
    pub fn new(name: impl Into<String>, address: &Address, at: Timestamp) -> Self {
        Self {
            id: None,
            sync_id: Uuid::new_v4(),
            name: name.into(),
            address_id: address.id,
            address_sync_id: Some(address.sync_id),
            created_on: at,
            modified_on: at,
            deleted: false,
            stamps: FieldStamps::new(),
        }
    }

    /// Changes the name.
    pub fn set_name(&mut self, name: impl Into<String>, at: Timestamp) {
        self.name = name.into();
        self.touch("name", at);
    }

    /// Moves the person to `address`.
    pub fn move_to(&mut self, address: &Address, at: Timestamp) {
        self.address_id = address.id;
        self.address_sync_id = Some(address.sync_id);
        self.touch("address", at);
    }

    /// Marks the person deleted.
    pub fn delete(&mut self, at: Timestamp) {
        self.deleted = true;
        self.touch("deleted", at);
    }

    fn touch(&mut self, field: &str, at: Timestamp) {
        self.stamps.touch(field, at);
        self.modified_on = self.modified_on.max(at);
    }
}

impl SyncEntity for Person {
    const TYPE_NAME: &'static str = "Person";
    const DEPENDS_ON: &'static [&'static str] = &["Address"];

    fn sync_id(&self) -> Uuid {
        self.sync_id
    }

    fn set_sync_id(&mut self, sync_id: Uuid) {
        self.sync_id = sync_id;
    }

    fn local_id(&self) -> Option<LocalId> {
        self.id
    }

    fn set_local_id(&mut self, local_id: Option<LocalId>) {
        self.id = local_id;
    }

    fn created_on(&self) -> Timestamp {
        self.created_on
    }

    fn modified_on(&self) -> Timestamp {
        self.modified_on
    }

    fn set_modified_on(&mut self, modified_on: Timestamp) {
        self.modified_on = modified_on;
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn relationships(&self) -> Vec<Relationship> {
        vec![Relationship::required(
            "address",
            Address::TYPE_NAME,
            self.address_id,
            self.address_sync_id,
        )]
    }

    fn set_relationship(&mut self, field: &str, local_id: Option<LocalId>, sync_id: Option<Uuid>) {
        if field == "address" {
            self.address_id = local_id;
            self.address_sync_id = sync_id;
        }
    }

    fn merge(&mut self, update: &Self, exclusions: &[&str]) -> bool {
        let mut merger = FieldMerger::new(
            &self.stamps,
            self.created_on,
            &update.stamps,
            update.created_on,
            exclusions,
        );
        merger.field("name", &mut self.name, &update.name);
        let mut address = (self.address_id, self.address_sync_id);
        merger.field(
            "address",
            &mut address,
            &(update.address_id, update.address_sync_id),
        );
        (self.address_id, self.address_sync_id) = address;
        merger.field("deleted", &mut self.deleted, &update.deleted);

        let (changed, stamps) = merger.finish();
        self.stamps = stamps;
        changed
    }
}

/// An audit record. Written once, never changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Local primary key.
    pub id: Option<LocalId>,
    /// Global id.
    pub sync_id: Uuid,
    /// Severity.
    pub level: String,
    /// Text.
    pub message: String,
    /// Creation time.
    pub created_on: Timestamp,
    /// Time of the last change.
    pub modified_on: Timestamp,
}

impl LogEvent {
    /// Creates an event written at `at`.
    pub fn new(level: impl Into<String>, message: impl Into<String>, at: Timestamp) -> Self {
        Self {
            id: None,
            sync_id: Uuid::new_v4(),
            level: level.into(),
            message: message.into(),
            created_on: at,
            modified_on: at,
        }
    }
}

impl SyncEntity for LogEvent {
    const TYPE_NAME: &'static str = "LogEvent";
    const IMMUTABLE: bool = true;

    fn sync_id(&self) -> Uuid {
        self.sync_id
    }

    fn set_sync_id(&mut self, sync_id: Uuid) {
        self.sync_id = sync_id;
    }

    fn local_id(&self) -> Option<LocalId> {
        self.id
    }

    fn set_local_id(&mut self, local_id: Option<LocalId>) {
        self.id = local_id;
    }

    fn created_on(&self) -> Timestamp {
        self.created_on
    }

    fn modified_on(&self) -> Timestamp {
        self.modified_on
    }

    fn set_modified_on(&mut self, modified_on: Timestamp) {
        self.modified_on = modified_on;
    }

    fn is_deleted(&self) -> bool {
        false
    }

    // No field stamps: the newer record wins as a whole.
    fn merge(&mut self, update: &Self, _exclusions: &[&str]) -> bool {
        if update.modified_on <= self.modified_on {
            return false;
        }
        let changed = self.level != update.level || self.message != update.message;
        self.level = update.level.clone();
        self.message = update.message.clone();
        changed
    }
}
