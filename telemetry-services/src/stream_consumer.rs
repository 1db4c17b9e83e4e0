//! Live log stream consumer
//!
//! Holds at most one open log connection. A pump task reads frames, applies
//! the client-side search filter, deduplicates into a bounded newest-first
//! buffer and broadcasts [`StreamEvent`]s to subscribers.
//!
//! Every connection gets a number. Stopping or changing the filter bumps the
//! number under the buffer lock, so a pump belonging to a torn-down
//! connection can never touch the buffer or emit events afterwards.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use telemetry_client::LogFrames;
use telemetry_core::{
    IdentityKey, LogEntry, StreamEvent, StreamFilter, StreamMessage, TelemetryResult,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::sources::LogTransport;

/// Maximum entries kept in the live buffer
pub const LIVE_BUFFER_CAPACITY: usize = 100;

/// Broadcast channel capacity for stream events
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Bounded, deduplicated, newest-first entry buffer
#[derive(Debug, Clone)]
pub struct LiveBuffer {
    entries: VecDeque<LogEntry>,
    keys: HashSet<IdentityKey>,
    capacity: usize,
}

impl Default for LiveBuffer {
    fn default() -> Self {
        Self::with_capacity(LIVE_BUFFER_CAPACITY)
    }
}

impl LiveBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            keys: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Prepend unless an entry with the same identity key is present.
    /// Returns whether the entry was inserted.
    pub fn insert(&mut self, entry: LogEntry) -> bool {
        let key = entry.identity_key();
        if self.keys.contains(&key) {
            return false;
        }

        self.keys.insert(key);
        self.entries.push_front(entry);

        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.entries.pop_back() {
                self.keys.remove(&evicted.identity_key());
            }
        }
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.keys.clear();
    }

    /// Newest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct LiveState {
    buffer: LiveBuffer,
    /// Number of the connection allowed to write
    connection: u64,
    active: bool,
    last_error: Option<String>,
}

/// Consumer for the live log stream
///
/// Owns at most one connection at a time. The server-side part of the
/// [`StreamFilter`] (type and level) is sent on connect; the search term is
/// applied here to every received entry. Subscribers get a
/// [`StreamEvent`] for each accepted entry, each in-band server error and
/// each connect or disconnect.
///
/// ## Key Design: Connection Numbers
///
/// Stopping aborts the pump task, but an aborted task may still be midway
/// through a frame. Every write the pump makes happens under the state lock
/// and first checks that its connection number is still current. Anything
/// that retires a connection (`stop`, a filter change) bumps the number in
/// the same critical section that clears the buffer, so old-filter entries
/// can never reappear after a change.
///
/// A dropped connection is not retried. The consumer reports
/// `Disconnected` with the error and stays inactive until `start` is called
/// again.
pub struct StreamConsumer {
    transport: Arc<dyn LogTransport>,
    filter: StreamFilter,
    shared: Arc<Mutex<LiveState>>,
    events: broadcast::Sender<StreamEvent>,
    task: Option<JoinHandle<()>>,
}

impl StreamConsumer {
    pub fn new(transport: Arc<dyn LogTransport>, filter: StreamFilter) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            filter,
            shared: Arc::new(Mutex::new(LiveState {
                buffer: LiveBuffer::new(),
                connection: 0,
                active: false,
                last_error: None,
            })),
            events,
            task: None,
        }
    }

    /// Subscribe to stream events
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    pub fn filter(&self) -> &StreamFilter {
        &self.filter
    }

    /// Buffered entries, newest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.shared.lock().buffer.entries()
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock().active
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().last_error.clone()
    }

    pub fn dismiss_error(&self) {
        self.shared.lock().last_error = None;
    }

    /// Open a connection with the current filter, closing any existing one
    pub async fn start(&mut self) -> TelemetryResult<()> {
        self.stop().await;

        let connection = {
            let mut state = self.shared.lock();
            state.connection += 1;
            state.connection
        };

        info!("[LiveLogs] Starting stream #{} with {:?}", connection, self.filter);

        let frames = match self.transport.connect(&self.filter).await {
            Ok(frames) => frames,
            Err(e) => {
                warn!("[LiveLogs] Connect failed: {}", e);
                let mut state = self.shared.lock();
                if state.connection == connection {
                    state.active = false;
                    state.last_error = Some(e.to_string());
                    let _ = self.events.send(StreamEvent::Disconnected {
                        error: Some(e.to_string()),
                    });
                }
                return Err(e);
            }
        };

        {
            let mut state = self.shared.lock();
            state.active = true;
            state.last_error = None;
            let _ = self.events.send(StreamEvent::Connected);
        }

        let pump = Pump {
            shared: Arc::clone(&self.shared),
            events: self.events.clone(),
            connection,
            search: self.filter.search_needle(),
        };
        self.task = Some(tokio::spawn(pump.run(frames)));
        Ok(())
    }

    /// Replace the filter and start
    pub async fn start_with(&mut self, filter: StreamFilter) -> TelemetryResult<()> {
        if filter != self.filter {
            {
                let mut state = self.shared.lock();
                state.buffer.clear();
                state.connection += 1;
            }
            self.filter = filter;
        }
        self.start().await
    }

    /// Close the connection. Idempotent.
    pub async fn stop(&mut self) {
        let was_active = {
            let mut state = self.shared.lock();
            state.connection += 1;
            let was_active = state.active;
            state.active = false;
            if was_active {
                let _ = self.events.send(StreamEvent::Disconnected { error: None });
            }
            was_active
        };

        if let Some(handle) = self.task.take() {
            handle.abort();
            let _ = handle.await;
        }

        if was_active {
            info!("[LiveLogs] Stream stopped");
        }
    }

    /// Change the filter. The buffer is cleared in the same step; the stream
    /// reconnects only if it was active.
    pub async fn set_filter(&mut self, filter: StreamFilter) -> TelemetryResult<()> {
        if filter == self.filter {
            return Ok(());
        }

        let was_active = {
            let mut state = self.shared.lock();
            state.buffer.clear();
            state.connection += 1;
            state.active
        };
        self.filter = filter;

        debug!("[LiveLogs] Filter changed to {:?}", self.filter);

        if was_active {
            self.start().await
        } else {
            Ok(())
        }
    }

    pub async fn update_filter(
        &mut self,
        update: impl FnOnce(&mut StreamFilter),
    ) -> TelemetryResult<()> {
        let mut filter = self.filter.clone();
        update(&mut filter);
        self.set_filter(filter).await
    }
}

impl Drop for StreamConsumer {
    fn drop(&mut self) {
        if let Some(handle) = self.task.take() {
            handle.abort();
        }
    }
}

/// Reads one connection's frames into the shared state
struct Pump {
    shared: Arc<Mutex<LiveState>>,
    events: broadcast::Sender<StreamEvent>,
    connection: u64,
    search: Option<String>,
}

impl Pump {
    async fn run(self, mut frames: LogFrames) {
        let mut error = None;

        while let Some(frame) = frames.next().await {
            match frame {
                Ok(text) => {
                    if !self.handle_frame(&text) {
                        return;
                    }
                }
                Err(e) => {
                    warn!("[LiveLogs] Stream #{} failed: {}", self.connection, e);
                    error = Some(e.to_string());
                    break;
                }
            }
        }

        let mut state = self.shared.lock();
        if state.connection != self.connection {
            return;
        }
        state.active = false;
        if error.is_some() {
            state.last_error = error.clone();
        }
        info!("[LiveLogs] Stream #{} disconnected", self.connection);
        let _ = self.events.send(StreamEvent::Disconnected { error });
    }

    /// Returns false once this connection has been superseded
    fn handle_frame(&self, text: &str) -> bool {
        let message: StreamMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                debug!("[LiveLogs] Dropping unparsable frame: {}", e);
                return true;
            }
        };

        let entry = message.entry.filter(|entry| match &self.search {
            Some(needle) => entry.matches_search(needle),
            None => true,
        });

        let mut state = self.shared.lock();
        if state.connection != self.connection {
            return false;
        }

        if let Some(error) = message.error {
            debug!("[LiveLogs] Server reported: {}", error);
            state.last_error = Some(error.clone());
            let _ = self.events.send(StreamEvent::Error(error));
        }

        if let Some(entry) = entry {
            if state.buffer.insert(entry.clone()) {
                let _ = self.events.send(StreamEvent::Entry(entry));
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use telemetry_core::TelemetryError;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    type FrameSender = mpsc::Sender<Result<String, TelemetryError>>;

    #[derive(Default)]
    struct MockTransport {
        senders: Mutex<Vec<FrameSender>>,
        connects: Mutex<Vec<StreamFilter>>,
        refuse: bool,
    }

    impl MockTransport {
        fn latest(&self) -> FrameSender {
            self.senders.lock().last().cloned().unwrap()
        }

        fn connect_count(&self) -> usize {
            self.connects.lock().len()
        }
    }

    #[async_trait]
    impl LogTransport for MockTransport {
        async fn connect(&self, filter: &StreamFilter) -> TelemetryResult<LogFrames> {
            self.connects.lock().push(filter.clone());
            if self.refuse {
                return Err(TelemetryError::network("connection refused"));
            }
            let (tx, rx) = mpsc::channel(256);
            self.senders.lock().push(tx);
            Ok(Box::pin(ReceiverStream::new(rx)))
        }
    }

    fn entry(timestamp: &str, message: &str) -> LogEntry {
        LogEntry {
            timestamp: timestamp.to_string(),
            level: "INFO".to_string(),
            logger: "engine".to_string(),
            module: "runner".to_string(),
            line: 42,
            message: message.to_string(),
        }
    }

    fn frame(entry: &LogEntry) -> Result<String, TelemetryError> {
        Ok(serde_json::to_string(&StreamMessage::entry(entry.clone())).unwrap())
    }

    async fn next_event(rx: &mut broadcast::Receiver<StreamEvent>) -> StreamEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for stream event")
            .expect("event channel closed")
    }

    async fn started(
        filter: StreamFilter,
    ) -> (
        Arc<MockTransport>,
        StreamConsumer,
        broadcast::Receiver<StreamEvent>,
    ) {
        let transport = Arc::new(MockTransport::default());
        let mut consumer = StreamConsumer::new(transport.clone(), filter);
        let mut rx = consumer.subscribe();
        consumer.start().await.unwrap();
        assert_eq!(next_event(&mut rx).await, StreamEvent::Connected);
        (transport, consumer, rx)
    }

    #[test]
    fn test_buffer_dedups_and_caps() {
        let mut buffer = LiveBuffer::new();
        for i in 0..150 {
            assert!(buffer.insert(entry(&format!("t{}", i), "tick")));
        }
        assert_eq!(buffer.len(), LIVE_BUFFER_CAPACITY);
        assert_eq!(buffer.entries()[0].timestamp, "t149");
        assert_eq!(buffer.entries()[99].timestamp, "t50");

        assert!(!buffer.insert(entry("t149", "tick")));
        assert_eq!(buffer.len(), LIVE_BUFFER_CAPACITY);
    }

    #[test]
    fn test_buffer_identity_uses_message_prefix() {
        let mut buffer = LiveBuffer::new();
        let base = "x".repeat(50);
        assert!(buffer.insert(entry("t", &format!("{}-first", base))));
        // Same timestamp and same first 50 chars
        assert!(!buffer.insert(entry("t", &format!("{}-second", base))));
        assert!(buffer.insert(entry("t", "different")));
    }

    #[test]
    fn test_evicted_entry_can_return() {
        let mut buffer = LiveBuffer::with_capacity(2);
        buffer.insert(entry("a", "m"));
        buffer.insert(entry("b", "m"));
        buffer.insert(entry("c", "m"));
        assert!(buffer.insert(entry("a", "m")));
        assert_eq!(buffer.len(), 2);
    }

    #[tokio::test]
    async fn test_entries_are_buffered_newest_first_without_duplicates() {
        let (transport, consumer, mut rx) = started(StreamFilter::default()).await;
        let tx = transport.latest();

        for i in 0..120 {
            tx.send(frame(&entry(&format!("2024-03-01T10:00:{:03}", i), "tick")))
                .await
                .unwrap();
        }
        // Redelivery of an entry still in the buffer
        tx.send(frame(&entry("2024-03-01T10:00:119", "tick"))).await.unwrap();
        let sentinel = entry("2024-03-01T10:01:000", "sentinel");
        tx.send(frame(&sentinel)).await.unwrap();

        let mut delivered = 0;
        loop {
            match next_event(&mut rx).await {
                StreamEvent::Entry(e) if e == sentinel => break,
                StreamEvent::Entry(_) => delivered += 1,
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(delivered, 120);

        let entries = consumer.entries();
        assert_eq!(entries.len(), LIVE_BUFFER_CAPACITY);
        assert_eq!(entries[0], sentinel);
        let keys: HashSet<_> = entries.iter().map(LogEntry::identity_key).collect();
        assert_eq!(keys.len(), entries.len());
    }

    #[tokio::test]
    async fn test_search_term_is_applied_client_side() {
        let (transport, consumer, mut rx) =
            started(StreamFilter::default().with_search_term("timeout")).await;
        assert!(transport.connects.lock()[0].connect_params().is_empty());

        let tx = transport.latest();
        tx.send(frame(&entry("t1", "order filled"))).await.unwrap();
        let wanted = entry("t2", "connection timeout on broker X");
        tx.send(frame(&wanted)).await.unwrap();

        assert_eq!(next_event(&mut rx).await, StreamEvent::Entry(wanted.clone()));
        assert_eq!(consumer.entries(), vec![wanted]);
    }

    #[tokio::test]
    async fn test_type_and_level_go_to_server_only() {
        let filter = StreamFilter::default().with_log_type("ERROR");
        let (transport, consumer, mut rx) = started(filter).await;
        assert_eq!(
            transport.connects.lock()[0].connect_params(),
            vec![("log_type", "ERROR".to_string())]
        );

        // No client-side level filtering
        let info = entry("t1", "plain info line");
        transport.latest().send(frame(&info)).await.unwrap();
        assert_eq!(next_event(&mut rx).await, StreamEvent::Entry(info));
        assert_eq!(consumer.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_in_band_error_keeps_connection_open() {
        let (transport, consumer, mut rx) = started(StreamFilter::default()).await;
        let tx = transport.latest();

        tx.send(Ok(r#"{"error":"log file rotated"}"#.to_string()))
            .await
            .unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            StreamEvent::Error("log file rotated".to_string())
        );
        assert!(consumer.is_active());
        assert_eq!(consumer.last_error().as_deref(), Some("log file rotated"));

        consumer.dismiss_error();
        assert_eq!(consumer.last_error(), None);

        let after = entry("t1", "still streaming");
        tx.send(frame(&after)).await.unwrap();
        assert_eq!(next_event(&mut rx).await, StreamEvent::Entry(after));
    }

    #[tokio::test]
    async fn test_envelope_with_both_fields_reports_error_first() {
        let (transport, _consumer, mut rx) = started(StreamFilter::default()).await;
        let both = StreamMessage {
            entry: Some(entry("t1", "late line")),
            error: Some("partial read".to_string()),
        };
        transport
            .latest()
            .send(Ok(serde_json::to_string(&both).unwrap()))
            .await
            .unwrap();

        assert_eq!(
            next_event(&mut rx).await,
            StreamEvent::Error("partial read".to_string())
        );
        assert_eq!(
            next_event(&mut rx).await,
            StreamEvent::Entry(entry("t1", "late line"))
        );
    }

    #[tokio::test]
    async fn test_unparsable_frames_are_dropped() {
        let (transport, consumer, mut rx) = started(StreamFilter::default()).await;
        let tx = transport.latest();

        tx.send(Ok("not json".to_string())).await.unwrap();
        tx.send(Ok("{}".to_string())).await.unwrap();
        let good = entry("t1", "good");
        tx.send(frame(&good)).await.unwrap();

        assert_eq!(next_event(&mut rx).await, StreamEvent::Entry(good));
        assert!(consumer.is_active());
        assert_eq!(consumer.last_error(), None);
    }

    #[tokio::test]
    async fn test_filter_change_while_active_clears_and_reconnects() {
        let (transport, mut consumer, mut rx) = started(StreamFilter::default()).await;
        let old_tx = transport.latest();
        old_tx.send(frame(&entry("t1", "before"))).await.unwrap();
        assert!(matches!(next_event(&mut rx).await, StreamEvent::Entry(_)));

        consumer
            .update_filter(|f| f.level = Some("ERROR".to_string()))
            .await
            .unwrap();
        assert!(consumer.entries().is_empty());
        assert!(consumer.is_active());
        assert_eq!(transport.connect_count(), 2);
        assert_eq!(
            transport.connects.lock()[1].connect_params(),
            vec![("level", "ERROR".to_string())]
        );

        assert_eq!(
            next_event(&mut rx).await,
            StreamEvent::Disconnected { error: None }
        );
        assert_eq!(next_event(&mut rx).await, StreamEvent::Connected);

        // The torn-down connection can no longer deliver
        let _ = old_tx.send(frame(&entry("t2", "stale"))).await;
        let fresh = entry("t3", "fresh");
        transport.latest().send(frame(&fresh)).await.unwrap();
        assert_eq!(next_event(&mut rx).await, StreamEvent::Entry(fresh.clone()));
        assert_eq!(consumer.entries(), vec![fresh]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_with_new_filter_retires_old_connection() {
        let (transport, mut consumer, mut rx) = started(StreamFilter::default()).await;
        let old_tx = transport.latest();
        old_tx.send(frame(&entry("t1", "before"))).await.unwrap();
        assert!(matches!(next_event(&mut rx).await, StreamEvent::Entry(_)));

        // Queued on the old connection while the filter changes
        old_tx.send(frame(&entry("t2", "in flight"))).await.unwrap();
        consumer
            .start_with(StreamFilter::default().with_log_type("trades"))
            .await
            .unwrap();
        assert!(consumer.entries().is_empty());
        assert_eq!(
            transport.connects.lock()[1].connect_params(),
            vec![("log_type", "trades".to_string())]
        );

        let _ = old_tx.send(frame(&entry("t3", "stale"))).await;
        let fresh = entry("t4", "fresh");
        transport.latest().send(frame(&fresh)).await.unwrap();
        loop {
            if let StreamEvent::Entry(e) = next_event(&mut rx).await {
                if e == fresh {
                    break;
                }
            }
        }
        assert_eq!(consumer.entries(), vec![fresh]);
    }

    #[tokio::test]
    async fn test_filter_change_while_inactive_does_not_connect() {
        let transport = Arc::new(MockTransport::default());
        let mut consumer = StreamConsumer::new(transport.clone(), StreamFilter::default());

        consumer
            .set_filter(StreamFilter::default().with_search_term("broker"))
            .await
            .unwrap();
        assert_eq!(transport.connect_count(), 0);
        assert!(!consumer.is_active());
        assert_eq!(consumer.filter().search_term.as_deref(), Some("broker"));
    }

    #[tokio::test]
    async fn test_transport_failure_disconnects_without_retry() {
        let (transport, consumer, mut rx) = started(StreamFilter::default()).await;
        transport
            .latest()
            .send(Err(TelemetryError::network("connection reset")))
            .await
            .unwrap();

        match next_event(&mut rx).await {
            StreamEvent::Disconnected { error: Some(e) } => assert!(e.contains("connection reset")),
            other => panic!("expected disconnect, got {:?}", other),
        }
        assert!(!consumer.is_active());
        assert!(consumer.last_error().is_some());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_server_close_disconnects_cleanly() {
        let (transport, consumer, mut rx) = started(StreamFilter::default()).await;
        transport.senders.lock().clear();

        assert_eq!(
            next_event(&mut rx).await,
            StreamEvent::Disconnected { error: None }
        );
        assert!(!consumer.is_active());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (transport, mut consumer, mut rx) = started(StreamFilter::default()).await;

        consumer.stop().await;
        assert!(!consumer.is_active());
        assert_eq!(
            next_event(&mut rx).await,
            StreamEvent::Disconnected { error: None }
        );
        assert!(transport.latest().is_closed());

        consumer.stop().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let transport = Arc::new(MockTransport {
            refuse: true,
            ..Default::default()
        });
        let mut consumer = StreamConsumer::new(transport, StreamFilter::default());
        let mut rx = consumer.subscribe();

        assert!(consumer.start().await.is_err());
        assert!(!consumer.is_active());
        assert!(matches!(
            next_event(&mut rx).await,
            StreamEvent::Disconnected { error: Some(_) }
        ));
    }
}
