//! The connection engine: one socket, one reader task, one writer lock,
//! and the stream table (RFC 7540 §5, §6.9).
//!
//! Readers and writers take locks in a fixed order, writer before the
//! per-connection state, so a stalled peer on one side can never deadlock
//! the other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use log::{debug, trace, warn};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::time::Duration;

use super::errors::{Error, ErrorCode};
use super::frame::{Frame, PriorityParams, StreamId, CLIENT_PREFACE, DEFAULT_MAX_FRAME_SIZE};
use super::hpack;
use super::settings::{SettingId, Settings};
use super::stream::Stream;
use crate::headers::Headers;

const CONNECTION_WINDOW_FLUSH_THRESHOLD: usize = 16 * 1024;
const DEGRADED_PING_TIMEOUT: Duration = Duration::from_secs(1);

/// Outbound frames queued by stream tasks; serialized onto the socket by a
/// single writer loop so frame bytes never interleave mid-write.
type WriteJob = (Frame, Option<oneshot::Sender<Result<(), Error>>>);

pub struct Connection {
    writer_tx: mpsc::UnboundedSender<WriteJob>,
    streams: DashMap<StreamId, Arc<Mutex<Stream>>>,
    next_stream_id: AtomicU32,
    local_settings: Mutex<Settings>,
    peer_settings: Mutex<Settings>,
    encoder: Mutex<hpack::Encoder>,
    decoder: Mutex<hpack::Decoder>,
    conn_send_window: Mutex<i64>,
    conn_recv_window: Mutex<i64>,
    shutdown: AtomicBool,
    goaway: Mutex<Option<(StreamId, ErrorCode)>>,
    last_peer_stream_id: AtomicU32,
    ping_waiters: Mutex<HashMap<[u8; 8], oneshot::Sender<()>>>,
    closed_notify: Notify,
    send_window_notify: Notify,
}

impl Connection {
    /// Sends the client preface and initial SETTINGS, spawns the writer and
    /// reader tasks, and returns the shared handle stream tasks use.
    pub async fn handshake<S>(socket: S, local: Settings) -> Result<Arc<Connection>, Error>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(socket);
        write_half.write_all(CLIENT_PREFACE).await?;

        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Connection {
            writer_tx,
            streams: DashMap::new(),
            next_stream_id: AtomicU32::new(1),
            local_settings: Mutex::new(local.clone()),
            peer_settings: Mutex::new(Settings::default()),
            encoder: Mutex::new(hpack::Encoder::new(local.header_table_size())),
            decoder: Mutex::new(hpack::Decoder::new(4096)),
            conn_send_window: Mutex::new(65_535),
            conn_recv_window: Mutex::new(local.initial_window_size() as i64),
            shutdown: AtomicBool::new(false),
            goaway: Mutex::new(None),
            last_peer_stream_id: AtomicU32::new(0),
            ping_waiters: Mutex::new(HashMap::new()),
            closed_notify: Notify::new(),
            send_window_notify: Notify::new(),
        });

        tokio::spawn(run_writer(write_half, writer_rx));
        tokio::spawn(run_reader(conn.clone(), read_half));

        conn.send_frame(Frame::Settings { ack: false, params: local.as_wire_params() }).await?;
        Ok(conn)
    }

    fn allocate_stream_id(&self) -> StreamId {
        self.next_stream_id.fetch_add(2, Ordering::SeqCst)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// The last stream id the peer's GOAWAY promised to process, if any
    /// arrived; a stream allocated above it must not be sent.
    pub fn goaway_last_stream_id(&self) -> Option<StreamId> {
        if self.goaway.try_lock().map(|g| g.is_some()).unwrap_or(false) {
            Some(self.last_peer_stream_id.load(Ordering::SeqCst))
        } else {
            None
        }
    }

    async fn send_frame(&self, frame: Frame) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.writer_tx
            .send((frame, Some(tx)))
            .map_err(|_| Error::Protocol("writer task gone".into()))?;
        rx.await.map_err(|_| Error::Protocol("writer task gone".into()))?
    }

    /// Opens a new client-initiated stream and writes its HEADERS frame
    /// (spilled into CONTINUATION as needed). Returns the stream handle the
    /// caller reads the response from.
    pub async fn open_stream(
        &self,
        headers: &[(String, String, hpack::Indexing)],
        end_stream: bool,
        priority: Option<PriorityParams>,
    ) -> Result<Arc<Mutex<Stream>>, Error> {
        if self.is_shutdown() {
            return Err(Error::GoAway { last_stream_id: 0, error_code: ErrorCode::NoError });
        }
        let stream_id = self.allocate_stream_id();
        let local = self.local_settings.lock().await.clone();
        let peer = self.peer_settings.lock().await.clone();
        let stream = Arc::new(Mutex::new(Stream::new(
            stream_id,
            peer.initial_window_size(),
            local.initial_window_size(),
        )));
        self.streams.insert(stream_id, stream.clone());
        {
            let s = stream.lock().await;
            s.open();
        }

        let header_block = {
            let mut encoder = self.encoder.lock().await;
            encoder.encode(headers)
        };

        self.send_frame(Frame::Headers {
            stream_id,
            end_stream,
            end_headers: true,
            priority,
            header_block: Bytes::from(header_block),
        })
        .await?;

        if end_stream {
            stream.lock().await.half_close_local();
        }

        Ok(stream)
    }

    /// Writes one DATA frame, sliced to the smaller of the connection and
    /// stream send windows and the peer's max frame size. When the window is
    /// fully exhausted, waits for a WINDOW_UPDATE rather than failing; the
    /// peer is expected to replenish it (RFC 7540 §6.9).
    pub async fn write_data(&self, stream: &Arc<Mutex<Stream>>, mut chunk: Bytes, end_stream: bool) -> Result<(), Error> {
        while !chunk.is_empty() {
            let peer_max_frame = self.peer_settings.lock().await.max_frame_size() as usize;
            let allowed = loop {
                let conn_window = *self.conn_send_window.lock().await;
                let stream_window = stream.lock().await.send_window();
                let allowed = (conn_window.min(stream_window).max(0) as usize)
                    .min(peer_max_frame)
                    .min(chunk.len());
                if allowed > 0 {
                    break allowed;
                }
                if self.is_shutdown() {
                    return Err(Error::Protocol("connection shut down while waiting for send window".into()));
                }
                // Register interest before rechecking so a WINDOW_UPDATE that
                // lands between the check above and this wait isn't missed.
                let notified = self.send_window_notify.notified();
                let conn_window = *self.conn_send_window.lock().await;
                let stream_window = stream.lock().await.send_window();
                if conn_window.min(stream_window) > 0 {
                    continue;
                }
                notified.await;
            };
            let piece = chunk.split_to(allowed);
            {
                let mut w = self.conn_send_window.lock().await;
                *w -= allowed as i64;
            }
            stream.lock().await.consume_send_window(allowed);
            let is_last = chunk.is_empty();
            self.send_frame(Frame::Data {
                stream_id: stream.lock().await.id,
                end_stream: end_stream && is_last,
                data: piece,
            })
            .await?;
        }
        if end_stream && chunk.is_empty() {
            stream.lock().await.half_close_local();
        }
        Ok(())
    }

    pub async fn reset_stream(&self, stream_id: StreamId, error_code: ErrorCode) -> Result<(), Error> {
        if let Some(entry) = self.streams.get(&stream_id) {
            entry.value().lock().await.close(error_code, "reset locally");
        }
        self.send_frame(Frame::RstStream { stream_id, error_code }).await
    }

    /// Liveness ping with a bounded pong deadline; used by the pool's idle
    /// health check and the periodic keep-alive.
    pub async fn ping(&self, payload: [u8; 8], deadline: Duration) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.ping_waiters.lock().await.insert(payload, tx);
        self.send_frame(Frame::Ping { ack: false, payload }).await?;
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(())) => Ok(()),
            _ => {
                self.ping_waiters.lock().await.remove(&payload);
                Err(Error::Protocol("ping timed out".into()))
            }
        }
    }

    pub async fn degraded_ping(&self) -> Result<(), Error> {
        self.ping(*b"degrade!", DEGRADED_PING_TIMEOUT).await
    }

    /// Refuses new streams above the last one we let through, then lets
    /// in-flight streams finish.
    pub async fn shutdown(&self, error_code: ErrorCode) -> Result<(), Error> {
        self.shutdown.store(true, Ordering::SeqCst);
        let last = self.next_stream_id.load(Ordering::SeqCst).saturating_sub(2);
        self.send_frame(Frame::GoAway { last_stream_id: last, error_code, debug_data: Bytes::new() })
            .await
    }

    pub async fn close(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for entry in self.streams.iter() {
            entry.value().lock().await.close(ErrorCode::Cancel, "connection closed");
        }
        self.send_window_notify.notify_waiters();
        self.closed_notify.notify_waiters();
    }

    pub async fn wait_closed(&self) {
        self.closed_notify.notified().await;
    }

    fn get_stream(&self, id: StreamId) -> Option<Arc<Mutex<Stream>>> {
        self.streams.get(&id).map(|e| e.value().clone())
    }
}

async fn run_writer<W>(mut write_half: WriteHalf<W>, mut rx: mpsc::UnboundedReceiver<WriteJob>)
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let mut max_frame_size = DEFAULT_MAX_FRAME_SIZE;
    while let Some((frame, reply)) = rx.recv().await {
        if let Frame::Settings { ack: false, params } = &frame {
            for (id, value) in params {
                if *id == SettingId::MaxFrameSize {
                    max_frame_size = *value;
                }
            }
        }
        let result = frame.write_into(&mut write_half, max_frame_size).await;
        if let Some(reply) = reply {
            let _ = reply.send(result.map_err(Error::from));
        }
    }
}

async fn run_reader<S>(conn: Arc<Connection>, mut read_half: ReadHalf<S>)
where
    S: AsyncRead + Send + Unpin + 'static,
{
    loop {
        let max_frame_size = conn.local_settings.lock().await.max_frame_size();
        let frame = match Frame::read_from(&mut read_half, max_frame_size).await {
            Ok(f) => f,
            Err(err) => {
                warn!("connection reader exiting: {err}");
                conn.close().await;
                return;
            }
        };
        if let Err(err) = dispatch(&conn, frame).await {
            warn!("connection protocol error: {err}");
            conn.close().await;
            return;
        }
    }
}

async fn dispatch(conn: &Arc<Connection>, frame: Frame) -> Result<(), Error> {
    match frame {
        Frame::Unknown => {}
        Frame::Settings { ack, params } => {
            if ack {
                trace!("settings acked");
            } else {
                let mut peer = conn.peer_settings.lock().await;
                peer.apply(&params);
                let table_size = peer.header_table_size();
                drop(peer);
                conn.encoder.lock().await.update_max_dynamic_table_size(table_size);
                conn.writer_tx
                    .send((Frame::Settings { ack: true, params: vec![] }, None))
                    .map_err(|_| Error::Protocol("writer task gone".into()))?;
            }
        }
        Frame::Ping { ack, payload } => {
            if ack {
                if let Some(tx) = conn.ping_waiters.lock().await.remove(&payload) {
                    let _ = tx.send(());
                }
            } else {
                conn.writer_tx
                    .send((Frame::Ping { ack: true, payload }, None))
                    .map_err(|_| Error::Protocol("writer task gone".into()))?;
            }
        }
        Frame::GoAway { last_stream_id, error_code, .. } => {
            debug!("peer GOAWAY last_stream_id={last_stream_id} error={error_code:?}");
            *conn.goaway.lock().await = Some((last_stream_id, error_code));
            conn.last_peer_stream_id.store(last_stream_id, Ordering::SeqCst);
            conn.shutdown.store(true, Ordering::SeqCst);
            // Streams we opened above the peer's last-processed id were
            // never acted on; fail them as refused so callers retry
            // elsewhere instead of waiting on a response that never comes.
            let unprocessed: Vec<StreamId> =
                conn.streams.iter().map(|e| *e.key()).filter(|id| *id > last_stream_id).collect();
            for id in unprocessed {
                if let Some((_, stream)) = conn.streams.remove(&id) {
                    stream.lock().await.close(ErrorCode::RefusedStream, "refused by peer GOAWAY");
                }
            }
            conn.send_window_notify.notify_waiters();
        }
        Frame::WindowUpdate { stream_id, increment } => {
            if stream_id == 0 {
                let mut w = conn.conn_send_window.lock().await;
                *w = w.saturating_add(increment as i64);
            } else if let Some(stream) = conn.get_stream(stream_id) {
                stream.lock().await.credit_send_window(increment);
            }
            conn.send_window_notify.notify_waiters();
        }
        Frame::RstStream { stream_id, error_code } => {
            if let Some(stream) = conn.get_stream(stream_id) {
                stream.lock().await.close(error_code, "reset by peer");
            }
        }
        Frame::Headers { stream_id, end_stream, header_block, .. } => {
            let fields = conn.decoder.lock().await.decode(&header_block)?;
            if let Some(stream) = conn.get_stream(stream_id) {
                let mut s = stream.lock().await;
                let mut headers = Headers::new();
                for f in &fields {
                    headers.add(f.name.clone(), f.value.clone());
                }
                if s.has_response_headers {
                    s.trailers = Some(headers);
                } else {
                    s.response_headers = Some(headers);
                    s.has_response_headers = true;
                }
                if end_stream {
                    s.mark_recv_closed();
                    s.half_close_remote();
                }
            }
        }
        Frame::Data { stream_id, end_stream, data } => {
            let len = data.len();
            if let Some(stream) = conn.get_stream(stream_id) {
                let local_initial_window = conn.local_settings.lock().await.initial_window_size();
                let mut s = stream.lock().await;
                s.debit_recv_window(len);
                s.push_data(data);
                if end_stream {
                    s.mark_recv_closed();
                    s.half_close_remote();
                }
                if let Some(increment) = s.recv_window_update_due(local_initial_window) {
                    s.credit_recv_window(increment);
                    drop(s);
                    conn.writer_tx
                        .send((Frame::WindowUpdate { stream_id, increment }, None))
                        .map_err(|_| Error::Protocol("writer task gone".into()))?;
                }
            }
            let mut conn_window = conn.conn_recv_window.lock().await;
            *conn_window -= len as i64;
            if (*conn_window) < 0 {
                return Err(Error::Protocol("connection recv window underflow".into()));
            }
            let deficit = 65_535 - *conn_window;
            if deficit as usize >= CONNECTION_WINDOW_FLUSH_THRESHOLD {
                *conn_window += deficit;
                drop(conn_window);
                conn.writer_tx
                    .send((Frame::WindowUpdate { stream_id: 0, increment: deficit as u32 }, None))
                    .map_err(|_| Error::Protocol("writer task gone".into()))?;
            }
        }
        Frame::PushPromise { stream_id, promised_stream_id, .. } => {
            // Server push beyond an observer hook is out of scope; refuse
            // politely so the peer doesn't wait on a promised stream we
            // will never fetch.
            conn.writer_tx
                .send((
                    Frame::RstStream { stream_id: promised_stream_id, error_code: ErrorCode::RefusedStream },
                    None,
                ))
                .map_err(|_| Error::Protocol("writer task gone".into()))?;
            let _ = stream_id;
        }
        Frame::Priority { .. } => {
            // Parsed for protocol correctness; reprioritization beyond
            // parsing is out of scope.
        }
        Frame::Continuation { .. } => {
            // The frame reader only ever emits a standalone CONTINUATION
            // when it follows a HEADERS/PUSH_PROMISE read loop internally;
            // reaching here means the peer sent one unsolicited.
            return Err(Error::Protocol("unexpected standalone CONTINUATION".into()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn handshake_writes_client_preface_and_settings() {
        let (client_end, mut server_end) = duplex(4096);
        let conn = Connection::handshake(client_end, Settings::local_initial()).await.unwrap();
        let mut buf = vec![0u8; CLIENT_PREFACE.len()];
        use tokio::io::AsyncReadExt;
        server_end.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, CLIENT_PREFACE);
        drop(conn);
    }

    async fn handshake_and_drain_preface(conn_settings: Settings) -> (Arc<Connection>, tokio::io::DuplexStream) {
        let (client_end, mut server_end) = duplex(4096);
        let conn = Connection::handshake(client_end, conn_settings).await.unwrap();
        let mut buf = vec![0u8; CLIENT_PREFACE.len()];
        use tokio::io::AsyncReadExt;
        server_end.read_exact(&mut buf).await.unwrap();
        let _client_settings = Frame::read_from(&mut server_end, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        (conn, server_end)
    }

    #[tokio::test]
    async fn goaway_refuses_streams_above_last_processed_id() {
        let (conn, mut server_end) = handshake_and_drain_preface(Settings::local_initial()).await;

        let low = conn.open_stream(&[], true, None).await.unwrap();
        let mid = conn.open_stream(&[], true, None).await.unwrap();
        let high = conn.open_stream(&[], true, None).await.unwrap();
        let last_processed = low.lock().await.id.max(mid.lock().await.id);

        Frame::GoAway { last_stream_id: last_processed, error_code: ErrorCode::NoError, debug_data: Bytes::new() }
            .write_into(&mut server_end, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
        loop {
            if high.lock().await.terminal_error().is_some() {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "high stream was never refused");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let err = high.lock().await.terminal_error().cloned().unwrap();
        assert_eq!(err.error_code, ErrorCode::RefusedStream);
        assert!(low.lock().await.terminal_error().is_none());
        assert_eq!(conn.goaway_last_stream_id(), Some(last_processed));
    }

    #[tokio::test]
    async fn write_data_blocks_on_exhausted_window_and_resumes_on_window_update() {
        let (conn, mut server_end) = handshake_and_drain_preface(Settings::local_initial()).await;

        Frame::Settings { ack: false, params: vec![(SettingId::InitialWindowSize, 5)] }
            .write_into(&mut server_end, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();
        match Frame::read_from(&mut server_end, DEFAULT_MAX_FRAME_SIZE).await.unwrap() {
            Frame::Settings { ack, .. } => assert!(ack),
            other => panic!("expected settings ack, got {other:?}"),
        }

        let stream = conn.open_stream(&[], false, None).await.unwrap();
        let stream_id = stream.lock().await.id;
        match Frame::read_from(&mut server_end, DEFAULT_MAX_FRAME_SIZE).await.unwrap() {
            Frame::Headers { .. } => {}
            other => panic!("expected headers, got {other:?}"),
        }

        let mut writer = {
            let conn = conn.clone();
            let stream = stream.clone();
            tokio::spawn(async move { conn.write_data(&stream, Bytes::from_static(b"0123456789"), true).await })
        };

        match Frame::read_from(&mut server_end, DEFAULT_MAX_FRAME_SIZE).await.unwrap() {
            Frame::Data { end_stream, data, .. } => {
                assert!(!end_stream);
                assert_eq!(&data[..], b"01234");
            }
            other => panic!("expected first data frame, got {other:?}"),
        }

        assert!(
            tokio::time::timeout(Duration::from_millis(50), &mut writer).await.is_err(),
            "write_data should still be blocked on the exhausted window"
        );

        Frame::WindowUpdate { stream_id, increment: 5 }
            .write_into(&mut server_end, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_millis(500), writer).await.unwrap().unwrap().unwrap();

        match Frame::read_from(&mut server_end, DEFAULT_MAX_FRAME_SIZE).await.unwrap() {
            Frame::Data { end_stream, data, .. } => {
                assert!(end_stream);
                assert_eq!(&data[..], b"56789");
            }
            other => panic!("expected second data frame, got {other:?}"),
        }
    }
}
