//! Incremental event-stream parser.
//!
//! Follows the line rules of the
//! [HTML Living Standard](https://html.spec.whatwg.org/multipage/server-sent-events.html):
//! LF, CR and CRLF all end a line, a leading BOM is skipped, `:` starts a
//! comment and unknown fields are ignored. Two deliberate differences:
//!
//! - `id` is reported per event and is not carried over to later events. The
//!   reconnection engine keeps its own watermark.
//! - An event is dispatched when it had at least one `data` line, even if the
//!   joined data is empty, so empty payloads survive the trip.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_util::Stream;

use crate::utils::error::ParseError;

const LF: u8 = b'\n';
const CR: u8 = b'\r';
const BOM: &[u8] = b"\xEF\xBB\xBF";

/// One decoded unit of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Event(RawEvent),
    /// A comment line, typically a heartbeat.
    Comment,
}

/// Event fields as they appeared on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawEvent {
    pub id: Option<String>,
    /// Empty when the event had no `event` field.
    pub event: String,
    pub data: Bytes,
}

#[derive(Debug, Default)]
struct Pending {
    id: Option<String>,
    event: Option<String>,
    data: Option<BytesMut>,
}

impl Pending {
    fn dispatch(&mut self) -> Option<RawEvent> {
        let pending = std::mem::take(self);
        let data = pending.data?;
        Some(RawEvent {
            id: pending.id,
            event: pending.event.unwrap_or_default(),
            data: data.freeze(),
        })
    }
}

/// Push-style parser: feed byte chunks, pull frames.
#[derive(Debug, Default)]
pub struct EventParser {
    buffer: BytesMut,
    pending: Pending,
    started: bool,
    finished: bool,
}

impl EventParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Marks end of input. A trailing CR now counts as a line end; an event
    /// without its blank terminator line is discarded.
    pub fn finish(&mut self) {
        if self.buffer.last() == Some(&CR) {
            self.buffer.put_u8(LF);
        }
        self.finished = true;
    }

    /// Returns the next complete frame, or `None` if more input is needed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ParseError> {
        if !self.started {
            if self.buffer.len() < BOM.len() && BOM.starts_with(&self.buffer) && !self.finished {
                return Ok(None);
            }
            if self.buffer.starts_with(BOM) {
                self.buffer.advance(BOM.len());
            }
            self.started = true;
        }

        while let Some(line) = self.next_line() {
            if line.is_empty() {
                if let Some(event) = self.pending.dispatch() {
                    return Ok(Some(Frame::Event(event)));
                }
                continue;
            }
            if line[0] == b':' {
                return Ok(Some(Frame::Comment));
            }
            self.apply_field(line)?;
        }

        if self.finished {
            self.pending = Pending::default();
        }
        Ok(None)
    }

    fn next_line(&mut self) -> Option<Bytes> {
        let pos = memchr::memchr2(CR, LF, &self.buffer)?;
        let skip = match self.buffer[pos] {
            LF => 1,
            _ if pos + 1 >= self.buffer.len() => return None,
            _ if self.buffer[pos + 1] == LF => 2,
            _ => 1,
        };
        let line = self.buffer.split_to(pos).freeze();
        self.buffer.advance(skip);
        Some(line)
    }

    fn apply_field(&mut self, line: Bytes) -> Result<(), ParseError> {
        let (name, value) = match memchr::memchr(b':', &line) {
            Some(colon) => {
                let value = line.slice(colon + 1..);
                let value = if value.first() == Some(&b' ') {
                    value.slice(1..)
                } else {
                    value
                };
                (line.slice(..colon), value)
            }
            None => (line.clone(), Bytes::new()),
        };

        match name.as_ref() {
            b"data" => match &mut self.pending.data {
                Some(data) => {
                    data.put_u8(LF);
                    data.extend_from_slice(&value);
                }
                None => self.pending.data = Some(BytesMut::from(value.as_ref())),
            },
            b"event" => {
                let event = std::str::from_utf8(&value).map_err(|_| ParseError::InvalidUtf8("event"))?;
                self.pending.event = Some(event.to_string());
            }
            b"id" => {
                if memchr::memchr(0, &value).is_none() {
                    let id = std::str::from_utf8(&value).map_err(|_| ParseError::InvalidUtf8("id"))?;
                    self.pending.id = Some(id.to_string());
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Adapts a stream of byte chunks into a stream of [`Frame`]s.
///
/// Transport errors are passed through; parse errors are converted with
/// `From<ParseError>`.
pub struct EventStream<S> {
    inner: S,
    parser: EventParser,
    done: bool,
}

impl<S> EventStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            parser: EventParser::new(),
            done: false,
        }
    }
}

impl<S, B, E> Stream for EventStream<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: From<ParseError>,
{
    type Item = Result<Frame, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match this.parser.next_frame() {
                Ok(Some(frame)) => return Poll::Ready(Some(Ok(frame))),
                Ok(None) if this.done => return Poll::Ready(None),
                Ok(None) => {}
                Err(e) => return Poll::Ready(Some(Err(e.into()))),
            }

            match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                Some(Ok(chunk)) => this.parser.feed(chunk.as_ref()),
                Some(Err(e)) => return Poll::Ready(Some(Err(e))),
                None => {
                    this.parser.finish();
                    this.done = true;
                }
            }
        }
    }
}
