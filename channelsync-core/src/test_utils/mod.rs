/*
    test_utils - In-memory channel and message stamping helpers

    Shared by the crate's test suites and the scenario harness binary. The
    mock channel records published message batches instead of sending them
    anywhere; tests feed them back through the engine (optionally via
    multiple engines) with server-style serial stamping.
*/

use crate::core_engine::channel::{ChannelAdapter, ChannelMode, ChannelState};
use crate::core_engine::errors::ObjectsResult;
use crate::core_object::timeserial::SITE_CODE_LEN;
use crate::core_object::types::Timestamp;
use crate::core_protocol::message::ObjectMessage;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// A scriptable in-memory channel
#[derive(Debug)]
pub struct MockChannel {
    state: Mutex<ChannelState>,
    modes: Mutex<Vec<ChannelMode>>,
    max_message_size: Mutex<Option<usize>>,
    echo_enabled: Mutex<bool>,
    client_id: Option<String>,
    connection_id: Option<String>,
    published: Mutex<Vec<Vec<ObjectMessage>>>,
}

impl MockChannel {
    /// An attached channel with both object modes and echo enabled
    pub fn attached(client_id: &str) -> Self {
        MockChannel {
            state: Mutex::new(ChannelState::Attached),
            modes: Mutex::new(vec![ChannelMode::ObjectSubscribe, ChannelMode::ObjectPublish]),
            max_message_size: Mutex::new(None),
            echo_enabled: Mutex::new(true),
            client_id: Some(client_id.to_string()),
            connection_id: Some(format!("conn-{client_id}")),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn set_state(&self, state: ChannelState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn set_modes(&self, modes: Vec<ChannelMode>) {
        *self.modes.lock().unwrap() = modes;
    }

    pub fn set_max_message_size(&self, limit: Option<usize>) {
        *self.max_message_size.lock().unwrap() = limit;
    }

    pub fn set_echo_enabled(&self, enabled: bool) {
        *self.echo_enabled.lock().unwrap() = enabled;
    }

    /// All message batches published so far, oldest first
    pub fn published(&self) -> Vec<Vec<ObjectMessage>> {
        self.published.lock().unwrap().clone()
    }

    /// Drain recorded batches, leaving the log empty
    pub fn take_published(&self) -> Vec<Vec<ObjectMessage>> {
        std::mem::take(&mut *self.published.lock().unwrap())
    }
}

#[async_trait]
impl ChannelAdapter for MockChannel {
    fn state(&self) -> ChannelState {
        *self.state.lock().unwrap()
    }

    fn modes(&self) -> Vec<ChannelMode> {
        self.modes.lock().unwrap().clone()
    }

    fn max_message_size(&self) -> Option<usize> {
        *self.max_message_size.lock().unwrap()
    }

    fn echo_enabled(&self) -> bool {
        *self.echo_enabled.lock().unwrap()
    }

    fn client_id(&self) -> Option<String> {
        self.client_id.clone()
    }

    fn connection_id(&self) -> Option<String> {
        self.connection_id.clone()
    }

    async fn publish(&self, messages: Vec<ObjectMessage>) -> ObjectsResult<()> {
        self.published.lock().unwrap().push(messages);
        Ok(())
    }
}

/// Stamps messages the way the server does: one site per stamper, with a
/// monotonically increasing counter inside the series
#[derive(Debug)]
pub struct SerialStamper {
    series_id: String,
    counter: AtomicU64,
}

impl SerialStamper {
    pub fn new(series_id: &str) -> Self {
        assert!(series_id.len() >= SITE_CODE_LEN, "series id too short");
        SerialStamper {
            series_id: series_id.to_string(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn site_code(&self) -> String {
        self.series_id[..SITE_CODE_LEN].to_string()
    }

    /// Stamp a message with the next serial in this series.
    ///
    /// Fields are zero-padded so serials from the same series stay
    /// lexicographically ordered across digit-count boundaries.
    pub fn stamp(&self, message: ObjectMessage) -> ObjectMessage {
        self.stamp_at(message, Timestamp::now().as_millis())
    }

    /// Stamp with an explicit timestamp, for deterministic ordering tests
    pub fn stamp_at(&self, mut message: ObjectMessage, timestamp_millis: u64) -> ObjectMessage {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst);
        message.serial = Some(format!(
            "{}@{:020}-{:010}",
            self.series_id, timestamp_millis, counter
        ));
        message.site_code = Some(self.site_code());
        message.serial_timestamp = Some(Timestamp::from_millis(timestamp_millis));
        message
    }
}
