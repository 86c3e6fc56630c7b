/*
    sync_cursor.rs - Sync sequence cursor parsing

    A sync channel serial is a two-part identifier "<sequence id>:<cursor>".
    An empty cursor marks the final message of the sequence. A serial that
    does not match the expected shape parses as neither id nor cursor, which
    the sequencer treats as a single-message sequence.
*/

/// A parsed sync channel serial
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncCursor {
    /// Identifier of the sync sequence this message belongs to
    pub sync_id: Option<String>,
    /// Position within the sequence; `None` or empty means final message
    pub cursor: Option<String>,
}

impl SyncCursor {
    /// Parse a sync channel serial
    pub fn parse(sync_serial: Option<&str>) -> Self {
        let Some(serial) = sync_serial else {
            return SyncCursor::default();
        };

        match serial.split_once(':') {
            Some((id, cursor))
                if !id.is_empty()
                    && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') =>
            {
                SyncCursor {
                    sync_id: Some(id.to_string()),
                    cursor: Some(cursor.to_string()),
                }
            }
            _ => SyncCursor::default(),
        }
    }

    /// True if this message is the final one of its sequence
    pub fn is_final(&self) -> bool {
        self.cursor.as_deref().map_or(true, |c| c.is_empty())
    }
}
