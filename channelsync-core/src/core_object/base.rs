/*
    base.rs - Common state shared by every replicated object

    Every object carries: its identity, the per-site map of the highest
    applied serial (the causal vector), a create-once guard, and a terminal
    tombstone marker with the time it was tombstoned.
*/

use crate::core_engine::errors::{ObjectsError, ObjectsResult};
use crate::core_object::timeserial::serial_wins;
use crate::core_object::types::Timestamp;
use std::collections::HashMap;
use tracing::debug;

/// Common fields of a replicated object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectBase {
    object_id: String,
    /// Site code -> highest serial already applied to this object
    site_serials: HashMap<String, String>,
    /// True once a create operation has been merged into this object
    create_merged: bool,
    tombstone: bool,
    tombstoned_at: Option<Timestamp>,
}

impl ObjectBase {
    pub fn new(object_id: impl Into<String>) -> Self {
        ObjectBase {
            object_id: object_id.into(),
            // empty serial map by default, so any future operation applies
            site_serials: HashMap::new(),
            create_merged: false,
            tombstone: false,
            tombstoned_at: None,
        }
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    pub fn is_tombstoned(&self) -> bool {
        self.tombstone
    }

    pub fn tombstoned_at(&self) -> Option<Timestamp> {
        self.tombstoned_at
    }

    pub fn create_merged(&self) -> bool {
        self.create_merged
    }

    pub fn set_create_merged(&mut self, merged: bool) {
        self.create_merged = merged;
    }

    /// Object-level causal check: the operation applies only if its serial is
    /// strictly greater than the recorded serial for the same site (or no
    /// serial is recorded for that site yet).
    pub fn can_apply_operation(
        &self,
        serial: Option<&str>,
        site_code: Option<&str>,
    ) -> ObjectsResult<bool> {
        let serial = serial
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ObjectsError::protocol(format!("Invalid serial: {serial:?}")))?;
        let site_code = site_code
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ObjectsError::protocol(format!("Invalid site code: {site_code:?}")))?;

        Ok(serial_wins(Some(serial), self.site_serials.get(site_code).map(String::as_str)))
    }

    /// Record the serial as applied for its site.
    ///
    /// Called as soon as the causal check passes, before any state change:
    /// the operation counts as processed even when it ends up a no-op, so
    /// stale duplicates are rejected later.
    pub fn record_applied_serial(&mut self, serial: &str, site_code: &str) {
        self.site_serials
            .insert(site_code.to_string(), serial.to_string());
    }

    /// Replace the whole serial map with the one from an object state.
    ///
    /// Sync data is authoritative; this happens even for tombstoned objects.
    pub fn replace_site_serials(&mut self, serials: HashMap<String, String>) {
        self.site_serials = serials;
    }

    pub fn site_serials(&self) -> &HashMap<String, String> {
        &self.site_serials
    }

    /// Mark the object tombstoned. Terminal: the flag is never cleared.
    ///
    /// The tombstone time comes from the deleting message's serial timestamp
    /// when present, else the local clock as a best-effort estimate.
    pub fn set_tombstoned(&mut self, serial_timestamp: Option<Timestamp>) {
        self.tombstone = true;
        self.tombstoned_at = Some(serial_timestamp.unwrap_or_else(|| {
            debug!(
                object_id = %self.object_id,
                "no serial timestamp on tombstoning message, using local clock"
            );
            Timestamp::now()
        }));
    }
}
