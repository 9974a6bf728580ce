//! The HTTP/2 wire stack: framing, HPACK, the stream engine, and the
//! connection engine that drives them over one socket.

mod connection;
mod errors;
mod flags;
mod frame;
mod hpack;
mod settings;
mod stream;

pub use connection::Connection;
pub use errors::{Error, ErrorCode};
pub use frame::{Frame, PriorityParams, StreamId, CLIENT_PREFACE, DEFAULT_MAX_FRAME_SIZE};
pub use hpack::{Decoder as HpackDecoder, Encoder as HpackEncoder, HeaderField, Indexing};
pub use settings::{SettingId, Settings};
pub use stream::{Stream, StreamError, StreamState};
