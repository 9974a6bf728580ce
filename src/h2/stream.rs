//! Per-stream state: send/recv flow-control windows, buffered data, and the
//! half-closed/closed lifecycle (RFC 7540 §5.1).

use bytes::{Bytes, BytesMut};
use tokio::sync::{watch, Notify};
use tokio::time::{timeout, Duration};

use super::errors::ErrorCode;
use super::frame::StreamId;
use crate::headers::Headers;

pub const READ_BUFFER_FLUSH_THRESHOLD: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

#[derive(Debug, Clone)]
pub struct StreamError {
    pub error_code: ErrorCode,
    pub cause: String,
}

/// A single HTTP/2 stream's buffers and windows. Reader and writer sides
/// are driven by the connection engine; callers interact through
/// `read_at_most`/`write`/`close`.
pub struct Stream {
    pub id: StreamId,
    state: watch::Sender<StreamState>,
    state_rx: watch::Receiver<StreamState>,

    send_window: i64,
    recv_window: i64,

    recv_buffer: BytesMut,
    recv_notify: Notify,
    recv_closed: bool,

    pub response_headers: Option<Headers>,
    pub trailers: Option<Headers>,
    pub has_response_headers: bool,

    terminal_error: Option<StreamError>,
}

impl Stream {
    pub fn new(id: StreamId, initial_send_window: u32, initial_recv_window: u32) -> Self {
        let (tx, rx) = watch::channel(StreamState::Idle);
        Stream {
            id,
            state: tx,
            state_rx: rx,
            send_window: initial_send_window as i64,
            recv_window: initial_recv_window as i64,
            recv_buffer: BytesMut::new(),
            recv_notify: Notify::new(),
            recv_closed: false,
            response_headers: None,
            trailers: None,
            has_response_headers: false,
            terminal_error: None,
        }
    }

    pub fn state(&self) -> StreamState {
        *self.state_rx.borrow()
    }

    pub fn set_state(&self, state: StreamState) {
        let _ = self.state.send(state);
    }

    pub fn open(&self) {
        self.set_state(StreamState::Open);
    }

    pub fn half_close_local(&self) {
        let current = self.state();
        self.set_state(match current {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        });
    }

    pub fn half_close_remote(&self) {
        let current = self.state();
        self.set_state(match current {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        });
    }

    pub fn is_closed(&self) -> bool {
        self.state() == StreamState::Closed || self.terminal_error.is_some()
    }

    /// Records a RST_STREAM or locally-initiated abort; subsequent reads and
    /// writes fail with this cause.
    pub fn close(&mut self, error_code: ErrorCode, cause: impl Into<String>) {
        self.terminal_error = Some(StreamError { error_code, cause: cause.into() });
        self.set_state(StreamState::Closed);
        self.recv_notify.notify_waiters();
    }

    pub fn terminal_error(&self) -> Option<&StreamError> {
        self.terminal_error.as_ref()
    }

    // --- send-side flow control ---

    pub fn send_window(&self) -> i64 {
        self.send_window
    }

    pub fn consume_send_window(&mut self, n: usize) {
        self.send_window -= n as i64;
    }

    pub fn credit_send_window(&mut self, increment: u32) {
        self.send_window = self.send_window.saturating_add(increment as i64);
    }

    // --- recv-side flow control and buffering ---

    pub fn recv_window(&self) -> i64 {
        self.recv_window
    }

    pub fn debit_recv_window(&mut self, n: usize) {
        self.recv_window -= n as i64;
    }

    pub fn credit_recv_window(&mut self, increment: u32) {
        self.recv_window = self.recv_window.saturating_add(increment as i64);
    }

    /// How much window the receiver should offer back to the peer to refill
    /// its budget once consumed bytes cross the flush threshold.
    pub fn recv_window_update_due(&self, initial_recv_window: u32) -> Option<u32> {
        let deficit = initial_recv_window as i64 - self.recv_window;
        if deficit as usize >= READ_BUFFER_FLUSH_THRESHOLD {
            Some(deficit as u32)
        } else {
            None
        }
    }

    pub fn push_data(&mut self, data: Bytes) {
        self.recv_buffer.extend_from_slice(&data);
        self.recv_notify.notify_waiters();
    }

    pub fn mark_recv_closed(&mut self) {
        self.recv_closed = true;
        self.recv_notify.notify_waiters();
    }

    /// Reads up to `max_len` bytes, waiting for more data to arrive if the
    /// buffer is empty and the stream has not ended. Bounded by
    /// `read_timeout` when set.
    pub async fn read_at_most(
        &mut self,
        max_len: usize,
        read_timeout: Option<Duration>,
    ) -> Result<Bytes, StreamError> {
        loop {
            if let Some(err) = &self.terminal_error {
                return Err(err.clone());
            }
            if !self.recv_buffer.is_empty() {
                let take = max_len.min(self.recv_buffer.len());
                return Ok(self.recv_buffer.split_to(take).freeze());
            }
            if self.recv_closed {
                return Ok(Bytes::new());
            }
            let wait = self.recv_notify.notified();
            match read_timeout {
                Some(d) => {
                    if timeout(d, wait).await.is_err() {
                        return Err(StreamError {
                            error_code: ErrorCode::Cancel,
                            cause: "stream read timed out".into(),
                        });
                    }
                }
                None => wait.await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_close_both_sides_reaches_closed() {
        let stream = Stream::new(1, 65_535, 65_535);
        stream.open();
        stream.half_close_local();
        assert_eq!(stream.state(), StreamState::HalfClosedLocal);
        stream.half_close_remote();
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[test]
    fn send_window_tracks_credits_and_debits() {
        let mut stream = Stream::new(1, 100, 100);
        stream.consume_send_window(40);
        assert_eq!(stream.send_window(), 60);
        stream.credit_send_window(10);
        assert_eq!(stream.send_window(), 70);
    }

    #[tokio::test]
    async fn read_at_most_returns_buffered_data_immediately() {
        let mut stream = Stream::new(1, 65_535, 65_535);
        stream.push_data(Bytes::from_static(b"hello"));
        let read = stream.read_at_most(3, None).await.unwrap();
        assert_eq!(&read[..], b"hel");
        let rest = stream.read_at_most(10, None).await.unwrap();
        assert_eq!(&rest[..], b"lo");
    }

    #[tokio::test]
    async fn read_at_most_returns_empty_once_stream_ends() {
        let mut stream = Stream::new(1, 65_535, 65_535);
        stream.mark_recv_closed();
        let read = stream.read_at_most(10, None).await.unwrap();
        assert!(read.is_empty());
    }
}
