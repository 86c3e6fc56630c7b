/*
    timeserial.rs - Causal timestamps

    A timeserial is the per-site logical timestamp attached to every operation
    message: "<series>@<timestamp>-<counter>[:<index>]". The site code is the
    first three characters of the series id. Serials from the same site are
    totally ordered; serials from different sites are only related through an
    object's recorded per-site serial map.

    The causal checks compare raw serial strings lexicographically, with a
    missing serial treated as the earliest possible value.
*/

use crate::core_engine::errors::{ObjectsError, ObjectsResult};
use crate::core_object::types::Timestamp;
use std::fmt;

/// Length of the site code prefix within a series id
pub const SITE_CODE_LEN: usize = 3;

/// A parsed timeserial
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeserial {
    pub series_id: String,
    pub site_code: String,
    pub timestamp: Timestamp,
    pub counter: u64,
    pub index: Option<u64>,
}

impl Timeserial {
    /// Parse a timeserial string
    pub fn parse(serial: &str) -> ObjectsResult<Self> {
        let invalid = || ObjectsError::protocol(format!("Invalid timeserial: {serial}"));

        let (series_id, rest) = serial.split_once('@').ok_or_else(invalid)?;
        if series_id.is_empty() || rest.is_empty() {
            return Err(invalid());
        }

        let (timestamp, counter_and_index) = rest.split_once('-').ok_or_else(invalid)?;
        let timestamp: u64 = timestamp.parse().map_err(|_| invalid())?;

        let (counter, index) = match counter_and_index.split_once(':') {
            Some((counter, index)) => {
                let index: u64 = index.parse().map_err(|_| invalid())?;
                (counter, Some(index))
            }
            None => (counter_and_index, None),
        };
        let counter: u64 = counter.parse().map_err(|_| invalid())?;

        let site_code = series_id
            .get(..SITE_CODE_LEN)
            .ok_or_else(invalid)?
            .to_string();

        Ok(Timeserial {
            series_id: series_id.to_string(),
            site_code,
            timestamp: Timestamp::from_millis(timestamp),
            counter,
            index,
        })
    }
}

impl fmt::Display for Timeserial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}-{}", self.series_id, self.timestamp, self.counter)?;
        if let Some(index) = self.index {
            write!(f, ":{}", index)?;
        }
        Ok(())
    }
}

/// Entry-level causal check: should an operation with serial `op_serial` be
/// applied over data last written at `entry_serial`?
///
/// Missing serials are the "earliest possible" value: two missing serials are
/// equal (not applied); a present op serial beats a missing entry serial; a
/// missing op serial never beats a present entry serial. Present serials
/// compare lexicographically.
pub fn serial_wins(op_serial: Option<&str>, entry_serial: Option<&str>) -> bool {
    let op = op_serial.filter(|s| !s.is_empty());
    let entry = entry_serial.filter(|s| !s.is_empty());

    match (op, entry) {
        (None, None) => false,
        (Some(_), None) => true,
        (None, Some(_)) => false,
        (Some(op), Some(entry)) => op > entry,
    }
}
