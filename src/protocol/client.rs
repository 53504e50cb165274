//! Recording protocol client
//!
//! Persistent JSON-frame connection to the recording backend. The client
//! lazily establishes the connection on first use and reuses it for all
//! callers; the handshake is serialized so concurrent callers never perform
//! it twice. A background heartbeat keeps the connection alive and schedules
//! reconnects with exponential backoff when it drops.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::protocol::auth::derive_auth_secret;
use crate::protocol::message::{
    Frame, HelloPayload, IdentifyPayload, RequestPayload, ResponsePayload, OP_HELLO,
    OP_IDENTIFIED, OP_IDENTIFY, OP_REQUEST, OP_REQUEST_RESPONSE,
};
use crate::utils::error::{ProtocolError, ProtocolResult};

/// Interval between heartbeat pings on a healthy connection
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
/// Initial reconnect delay after a failed heartbeat
const BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Reconnect delay cap
const BACKOFF_MAX: Duration = Duration::from_secs(5);
/// Lightweight request used as the heartbeat ping
const HEARTBEAT_REQUEST: &str = "GetVersion";
/// Poll interval while waiting for a track's output file
const TRACK_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Exponential reconnect backoff, reset on any successful heartbeat
#[derive(Debug)]
pub(crate) struct Backoff {
    delay: Duration,
}

impl Backoff {
    pub(crate) fn new() -> Self {
        Self { delay: BACKOFF_BASE }
    }

    pub(crate) fn reset(&mut self) {
        self.delay = BACKOFF_BASE;
    }

    /// The delay to sleep before the next attempt; doubles up to the cap
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.delay;
        self.delay = (self.delay * 2).min(BACKOFF_MAX);
        delay
    }
}

type PendingMap = parking_lot::Mutex<HashMap<String, oneshot::Sender<ResponsePayload>>>;

/// One established connection: write half plus the reader task that routes
/// responses to waiting callers by correlation id
struct Connection {
    writer: OwnedWriteHalf,
    pending: Arc<PendingMap>,
    reader: JoinHandle<()>,
}

struct ClientInner {
    config: ClientConfig,
    conn: AsyncMutex<Option<Connection>>,
    heartbeat: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

/// Shared handle to the recording backend
///
/// Cloning is cheap; all clones share one connection.
#[derive(Clone)]
pub struct RecordingClient {
    inner: Arc<ClientInner>,
}

impl RecordingClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                conn: AsyncMutex::new(None),
                heartbeat: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Explicitly establish the connection
    pub async fn connect(&self) -> ProtocolResult<()> {
        let mut guard = self.inner.conn.lock().await;
        if guard.as_ref().is_none_or_dead() {
            if let Some(stale) = guard.take() {
                stale.reader.abort();
            }
            *guard = Some(establish(&self.inner.config).await?);
            self.spawn_heartbeat();
        }
        Ok(())
    }

    /// Tear down the connection and stop the heartbeat
    pub async fn close(&self) {
        if let Some(handle) = self.inner.heartbeat.lock().take() {
            handle.abort();
        }
        self.drop_connection().await;
    }

    /// Send a request and await its correlated response
    ///
    /// Every network operation is individually bounded by the configured
    /// timeout. If the connection turns out to be closed the request is
    /// retried exactly once over a fresh connection; a second failure is
    /// fatal. A response timeout is fatal immediately.
    pub async fn request(
        &self,
        request_type: &str,
        request_data: Option<Value>,
    ) -> ProtocolResult<ResponsePayload> {
        let t = self.inner.config.timeout;
        for attempt in 0..2u8 {
            let rx = match self.begin_request(request_type, request_data.clone()).await {
                Ok(rx) => rx,
                Err(ProtocolError::Closed) => {
                    tracing::warn!(request_type, "connection closed while sending; reconnecting");
                    self.drop_connection().await;
                    continue;
                }
                Err(err) => return Err(err),
            };
            match timeout(t, rx).await {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(_)) => {
                    // The reader task dropped our sender: the connection
                    // died between send and response.
                    tracing::warn!(
                        request_type,
                        attempt,
                        "connection lost awaiting response; reconnecting"
                    );
                    self.drop_connection().await;
                }
                Err(_) => {
                    tracing::error!(request_type, "request timed out");
                    return Err(ProtocolError::Timeout(t));
                }
            }
        }
        Err(ProtocolError::RetryExhausted {
            request_type: request_type.to_string(),
        })
    }

    /// Register a pending response slot and write the request frame
    async fn begin_request(
        &self,
        request_type: &str,
        request_data: Option<Value>,
    ) -> ProtocolResult<oneshot::Receiver<ResponsePayload>> {
        let mut guard = self.inner.conn.lock().await;
        if guard.as_ref().is_none_or_dead() {
            if let Some(stale) = guard.take() {
                stale.reader.abort();
            }
            *guard = Some(establish(&self.inner.config).await?);
            self.spawn_heartbeat();
        }
        let Some(conn) = guard.as_mut() else {
            return Err(ProtocolError::Closed);
        };

        let request_id = Uuid::new_v4().simple().to_string();
        let payload = RequestPayload {
            request_type: request_type.to_string(),
            request_id: request_id.clone(),
            request_data,
        };
        let frame = Frame::new(OP_REQUEST, &payload)?;

        let (tx, rx) = oneshot::channel();
        conn.pending.lock().insert(request_id.clone(), tx);
        if let Err(err) = write_frame(&mut conn.writer, &frame, self.inner.config.timeout).await {
            conn.pending.lock().remove(&request_id);
            return Err(err);
        }
        Ok(rx)
    }

    async fn drop_connection(&self) {
        let mut guard = self.inner.conn.lock().await;
        if let Some(conn) = guard.take() {
            conn.reader.abort();
        }
    }

    fn spawn_heartbeat(&self) {
        let mut slot = self.inner.heartbeat.lock();
        if slot.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }
        let client = self.clone();
        *slot = Some(tokio::spawn(heartbeat_loop(client)));
    }

    // ------------------------------------------------------------------ //
    // Full-session recording
    // ------------------------------------------------------------------ //

    pub async fn start_record(&self) -> ProtocolResult<ResponsePayload> {
        self.request("StartRecord", None).await
    }

    pub async fn stop_record(&self) -> ProtocolResult<ResponsePayload> {
        self.request("StopRecord", None).await
    }

    pub async fn pause_record(&self) -> ProtocolResult<ResponsePayload> {
        self.request("PauseRecord", None).await
    }

    pub async fn resume_record(&self) -> ProtocolResult<ResponsePayload> {
        self.request("ResumeRecord", None).await
    }

    // ------------------------------------------------------------------ //
    // Named outputs and per-camera source records
    // ------------------------------------------------------------------ //

    pub async fn start_output(&self, output_name: &str) -> ProtocolResult<ResponsePayload> {
        self.request("StartOutput", Some(json!({ "outputName": output_name })))
            .await
    }

    pub async fn stop_output(&self, output_name: &str) -> ProtocolResult<ResponsePayload> {
        self.request("StopOutput", Some(json!({ "outputName": output_name })))
            .await
    }

    /// Start a source record by its numeric id (vendor request)
    pub async fn start_source_record(&self, source_record_id: i64) -> ProtocolResult<ResponsePayload> {
        self.request(
            "CallVendorRequest",
            Some(json!({
                "vendorName": "source-record",
                "requestType": "start",
                "requestData": { "sourceRecordID": source_record_id },
            })),
        )
        .await
    }

    /// Stop a source record by its numeric id (vendor request)
    pub async fn stop_source_record(&self, source_record_id: i64) -> ProtocolResult<ResponsePayload> {
        self.request(
            "CallVendorRequest",
            Some(json!({
                "vendorName": "source-record",
                "requestType": "stop",
                "requestData": { "sourceRecordID": source_record_id },
            })),
        )
        .await
    }

    // ------------------------------------------------------------------ //
    // Track status / overlay helpers
    // ------------------------------------------------------------------ //

    /// One status snapshot for a track recording
    pub async fn track_status(&self, track_id: &str) -> ProtocolResult<ResponsePayload> {
        self.request("GetTrackStatus", Some(json!({ "trackId": track_id })))
            .await
    }

    /// Poll a track's status until it reports an output file path
    ///
    /// Gives up with a timeout error once `max_wait` has elapsed.
    pub async fn wait_for_track_file(
        &self,
        track_id: &str,
        max_wait: Duration,
    ) -> ProtocolResult<String> {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let response = self.track_status(track_id).await?;
            if let Some(path) = response.data_str("outputPath") {
                return Ok(path.to_string());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ProtocolError::Timeout(max_wait));
            }
            tokio::time::sleep(TRACK_POLL_INTERVAL).await;
        }
    }

    /// Push a text value into a named overlay field
    pub async fn set_text(&self, input_name: &str, text: &str) -> ProtocolResult<ResponsePayload> {
        self.request(
            "SetInputSettings",
            Some(json!({
                "inputName": input_name,
                "inputSettings": { "text": text },
                "overlay": true,
            })),
        )
        .await
    }

    /// Reload a named overlay browser source
    pub async fn refresh_browser_source(
        &self,
        input_name: &str,
    ) -> ProtocolResult<ResponsePayload> {
        self.request(
            "PressInputPropertiesButton",
            Some(json!({
                "inputName": input_name,
                "propertyName": "refreshnocache",
            })),
        )
        .await
    }
}

/// Convenience check for "no connection, or its reader task is gone"
trait ConnSlot {
    fn is_none_or_dead(&self) -> bool;
}

impl ConnSlot for Option<&Connection> {
    fn is_none_or_dead(&self) -> bool {
        match self {
            Some(conn) => conn.reader.is_finished(),
            None => true,
        }
    }
}

/// Open the socket and perform the hello/identify handshake
///
/// Called with the connection slot locked, so two concurrent callers never
/// handshake twice.
async fn establish(config: &ClientConfig) -> ProtocolResult<Connection> {
    let t = config.timeout;
    let addr = format!("{}:{}", config.host, config.port);
    let stream = timeout(t, TcpStream::connect(&addr))
        .await
        .map_err(|_| ProtocolError::Timeout(t))?
        .map_err(ProtocolError::Connect)?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let hello = read_frame(&mut reader, t).await?;
    if hello.op != OP_HELLO {
        return Err(ProtocolError::Handshake(format!(
            "expected hello, got op {}",
            hello.op
        )));
    }
    let hello: HelloPayload = serde_json::from_value(hello.d)?;

    let mut identify = IdentifyPayload::new();
    if let Some(password) = &config.password {
        let auth = hello.authentication.unwrap_or_default();
        identify.authentication = Some(derive_auth_secret(password, &auth.salt, &auth.challenge));
        identify.password = Some(password.clone());
    }
    write_frame(&mut write_half, &Frame::new(OP_IDENTIFY, &identify)?, t).await?;

    let identified = match read_frame(&mut reader, t).await {
        Ok(frame) => frame,
        // A server that closes instead of confirming has rejected us.
        Err(ProtocolError::Closed) if config.password.is_some() => {
            return Err(ProtocolError::AuthRejected);
        }
        Err(err) => return Err(err),
    };
    if identified.op != OP_IDENTIFIED {
        return Err(if config.password.is_some() {
            ProtocolError::AuthRejected
        } else {
            ProtocolError::Handshake(format!("expected identified, got op {}", identified.op))
        });
    }

    let pending: Arc<PendingMap> = Arc::new(parking_lot::Mutex::new(HashMap::new()));
    let reader_task = tokio::spawn(read_loop(reader, Arc::clone(&pending)));
    tracing::info!(%addr, "recording backend connection established");
    Ok(Connection {
        writer: write_half,
        pending,
        reader: reader_task,
    })
}

/// Route inbound response frames to their waiting callers
///
/// Frames that are not responses (events) or match no pending id are
/// skipped. On any read failure the pending map is drained, which tells
/// every waiting caller the connection died.
async fn read_loop(reader: BufReader<OwnedReadHalf>, pending: Arc<PendingMap>) {
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let frame: Frame = match serde_json::from_str(&line) {
                    Ok(frame) => frame,
                    Err(err) => {
                        tracing::warn!("discarding unparseable frame: {err}");
                        continue;
                    }
                };
                if frame.op != OP_REQUEST_RESPONSE {
                    continue;
                }
                match serde_json::from_value::<ResponsePayload>(frame.d) {
                    Ok(response) => {
                        if let Some(tx) = pending.lock().remove(&response.request_id) {
                            let _ = tx.send(response);
                        }
                    }
                    Err(err) => tracing::warn!("malformed response frame: {err}"),
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::debug!("connection read failed: {err}");
                break;
            }
        }
    }
    pending.lock().clear();
}

async fn read_frame(reader: &mut BufReader<OwnedReadHalf>, t: Duration) -> ProtocolResult<Frame> {
    let mut line = String::new();
    let n = timeout(t, reader.read_line(&mut line))
        .await
        .map_err(|_| ProtocolError::Timeout(t))?
        .map_err(|_| ProtocolError::Closed)?;
    if n == 0 {
        return Err(ProtocolError::Closed);
    }
    Ok(serde_json::from_str(&line)?)
}

async fn write_frame(writer: &mut OwnedWriteHalf, frame: &Frame, t: Duration) -> ProtocolResult<()> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    timeout(t, writer.write_all(line.as_bytes()))
        .await
        .map_err(|_| ProtocolError::Timeout(t))?
        .map_err(|_| ProtocolError::Closed)?;
    Ok(())
}

/// Ping loop, independent of request traffic
///
/// A failed ping drops the connection and schedules the next attempt with
/// exponential backoff; any success resets the backoff to its base delay.
async fn heartbeat_loop(client: RecordingClient) {
    let mut backoff = Backoff::new();
    let mut next_ping = HEARTBEAT_INTERVAL;
    loop {
        tokio::time::sleep(next_ping).await;
        match client.request(HEARTBEAT_REQUEST, None).await {
            Ok(_) => {
                backoff.reset();
                next_ping = HEARTBEAT_INTERVAL;
            }
            Err(err) => {
                tracing::warn!("heartbeat failed; resetting connection: {err}");
                client.drop_connection().await;
                next_ping = backoff.next_delay();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::testing::{BackendOptions, FakeBackend};

    fn client_for(backend: &FakeBackend, password: Option<&str>) -> RecordingClient {
        RecordingClient::new(ClientConfig {
            host: "127.0.0.1".into(),
            port: backend.port(),
            password: password.map(str::to_string),
            timeout: Duration::from_millis(300),
        })
    }

    #[test]
    fn test_backoff_doubles_to_cap_and_resets() {
        let mut backoff = Backoff::new();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));

        // A successful heartbeat never increases the delay.
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_request_response_roundtrip() {
        let backend = FakeBackend::spawn(BackendOptions::default()).await;
        let client = client_for(&backend, None);

        let response = client.start_record().await.unwrap();
        assert!(response.request_status.result);
        assert_eq!(backend.request_types(), vec!["StartRecord"]);
    }

    #[tokio::test]
    async fn test_authenticated_handshake() {
        let backend = FakeBackend::spawn(BackendOptions {
            password: Some("supersecret".into()),
            ..Default::default()
        })
        .await;
        let client = client_for(&backend, Some("supersecret"));

        client.start_output("red_cam").await.unwrap();
        assert_eq!(backend.request_types(), vec!["StartOutput"]);
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let backend = FakeBackend::spawn(BackendOptions {
            password: Some("supersecret".into()),
            ..Default::default()
        })
        .await;
        let client = client_for(&backend, Some("wrong"));

        let err = client.start_record().await.unwrap_err();
        assert!(matches!(err, ProtocolError::AuthRejected), "{err}");
        assert!(backend.request_types().is_empty());
    }

    #[tokio::test]
    async fn test_event_frames_are_skipped() {
        let backend = FakeBackend::spawn(BackendOptions {
            event_before_response: true,
            ..Default::default()
        })
        .await;
        let client = client_for(&backend, None);

        let response = client.stop_record().await.unwrap();
        assert!(response.request_status.result);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_connection() {
        let backend = FakeBackend::spawn(BackendOptions::default()).await;
        let client = client_for(&backend, None);

        let (a, b, c) = tokio::join!(
            client.start_output("red_cam"),
            client.start_output("blue_cam"),
            client.start_source_record(3),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();
        assert_eq!(backend.connections(), 1);
    }

    #[tokio::test]
    async fn test_dead_connection_recovers_with_one_retry() {
        let backend = FakeBackend::spawn(BackendOptions {
            drop_after_responses: Some(1),
            ..Default::default()
        })
        .await;
        let client = client_for(&backend, None);

        client.start_record().await.unwrap();
        // The backend has silently closed the connection; the next request
        // must succeed after a single transparent reconnect.
        client.stop_record().await.unwrap();
        assert_eq!(backend.connections(), 2);
        assert_eq!(backend.request_types(), vec!["StartRecord", "StopRecord"]);
    }

    #[tokio::test]
    async fn test_unresponsive_server_times_out() {
        let backend = FakeBackend::spawn(BackendOptions {
            respond: false,
            ..Default::default()
        })
        .await;
        let client = client_for(&backend, None);

        let err = client.start_record().await.unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout(_)), "{err}");
    }

    #[tokio::test]
    async fn test_second_failure_is_fatal() {
        let backend = FakeBackend::spawn(BackendOptions {
            close_on_request: true,
            ..Default::default()
        })
        .await;
        let client = client_for(&backend, None);

        let err = client.start_record().await.unwrap_err();
        assert!(matches!(err, ProtocolError::RetryExhausted { .. }), "{err}");
        assert_eq!(backend.connections(), 2);
    }

    #[tokio::test]
    async fn test_soft_inactive_response_is_effectively_ok() {
        let backend = FakeBackend::spawn(BackendOptions {
            failure_comment: Some("Output already active".into()),
            ..Default::default()
        })
        .await;
        let client = client_for(&backend, None);

        let response = client.start_output("red_cam").await.unwrap();
        assert!(!response.request_status.result);
        assert!(response.is_effectively_ok());
    }

    #[tokio::test]
    async fn test_wait_for_track_file_returns_path() {
        let backend = FakeBackend::spawn(BackendOptions {
            response_data: Some(json!({ "outputPath": "/rec/B01_R01_red.mkv" })),
            ..Default::default()
        })
        .await;
        let client = client_for(&backend, None);

        let path = client
            .wait_for_track_file("red_cam", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(path, "/rec/B01_R01_red.mkv");
    }

    #[tokio::test]
    async fn test_wait_for_track_file_times_out_without_path() {
        let backend = FakeBackend::spawn(BackendOptions::default()).await;
        let client = client_for(&backend, None);

        let err = client
            .wait_for_track_file("red_cam", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout(_)), "{err}");
    }

    #[tokio::test]
    async fn test_source_record_vendor_request_shape() {
        let backend = FakeBackend::spawn(BackendOptions::default()).await;
        let client = client_for(&backend, None);

        client.start_source_record(7).await.unwrap();
        let (request_type, data) = backend.requests().remove(0);
        assert_eq!(request_type, "CallVendorRequest");
        assert_eq!(data["vendorName"], "source-record");
        assert_eq!(data["requestType"], "start");
        assert_eq!(data["requestData"]["sourceRecordID"], 7);
    }
}
