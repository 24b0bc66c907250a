//! Event-stream encoding of hub records.
//!
//! ```text
//! id: 42
//! event: price        (omitted when the record is untyped)
//! data: first line
//! data: second line
//!
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::broker::{Message, ReplayGap};

/// Event type of the control event announcing lost records. It never carries an id.
pub const GAP_EVENT: &str = "replay-gap";

/// Keep-alive comment.
pub const HEARTBEAT: &[u8] = b":\n\n";

/// Encodes one record as an event-stream block.
pub fn encode(message: &Message) -> Bytes {
    let mut buf = BytesMut::with_capacity(message.payload.len() + 32);
    buf.put_slice(format!("id: {}\n", message.id).as_bytes());
    if !message.event_type.is_empty() {
        buf.put_slice(b"event: ");
        buf.put_slice(message.event_type.as_bytes());
        buf.put_u8(b'\n');
    }
    put_data(&mut buf, &message.payload);
    buf.put_u8(b'\n');
    buf.freeze()
}

/// Encodes the data-loss control event.
pub fn encode_gap(gap: &ReplayGap) -> Bytes {
    let body = serde_json::to_vec(gap).unwrap_or_default();
    let mut buf = BytesMut::with_capacity(body.len() + 32);
    buf.put_slice(format!("event: {GAP_EVENT}\n").as_bytes());
    put_data(&mut buf, &body);
    buf.put_u8(b'\n');
    buf.freeze()
}

/// One `data:` line per payload line. CRLF and bare CR count as line breaks,
/// the receiver joins lines back with LF.
fn put_data(buf: &mut BytesMut, payload: &[u8]) {
    for line in lines(payload) {
        buf.put_slice(b"data: ");
        buf.put_slice(line);
        buf.put_u8(b'\n');
    }
}

fn lines(payload: &[u8]) -> Vec<&[u8]> {
    let mut out = Vec::new();
    let mut rest = payload;
    while let Some(pos) = memchr::memchr2(b'\r', b'\n', rest) {
        out.push(&rest[..pos]);
        let skip = if rest[pos] == b'\r' && rest.get(pos + 1) == Some(&b'\n') {
            2
        } else {
            1
        };
        rest = &rest[pos + skip..];
    }
    out.push(rest);
    out
}
