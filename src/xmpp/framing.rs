//! Incremental stream framing.
//!
//! Bytes read from the socket are appended to a [`FrameBuffer`]; complete
//! top-level units are taken off the front as [`Frame`]s:
//!
//! ```text
//! <stream:stream ...>        → Frame::StreamOpen
//!   <iq ...>...</iq>         → Frame::Stanza
//!   <presence/>              → Frame::Stanza
//! </stream:stream>           → Frame::StreamClose
//! ```
//!
//! A unit split across reads stays buffered until the rest arrives.

use quick_xml::errors::SyntaxError;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::GatewayError;

/// Upper bound on buffered, not yet complete input.
const MAX_BUFFERED: usize = 1024 * 1024;

/// One complete unit of the XML stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    StreamOpen(String),
    Stanza(String),
    StreamClose,
}

/// Accumulates raw bytes and yields complete frames.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Take the next complete frame, if any.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, GatewayError> {
        match extract_frame(&self.buf)? {
            Some((frame, consumed)) => {
                self.buf.drain(..consumed);
                Ok(Some(frame))
            }
            None if self.buf.len() > MAX_BUFFERED => Err(GatewayError::Protocol(
                "stanza exceeds maximum buffered size".into(),
            )),
            None => Ok(None),
        }
    }
}

fn is_stream(local_name: &[u8]) -> bool {
    local_name == b"stream"
}

/// Find the first complete frame in `buf`, returning it with the number of
/// bytes it occupies (including any leading whitespace or declarations).
fn extract_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, GatewayError> {
    let mut reader = Reader::from_reader(buf);
    // The stream header was consumed by an earlier call, so its close tag
    // arrives unmatched.
    let config = reader.config_mut();
    config.check_end_names = false;
    config.allow_unmatched_ends = true;

    let mut depth = 0usize;
    let mut stanza_start = 0usize;

    loop {
        let pos = reader.buffer_position() as usize;
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if depth == 0 && is_stream(e.name().local_name().as_ref()) {
                    let end = reader.buffer_position() as usize;
                    let text = String::from_utf8_lossy(&buf[pos..end]).into_owned();
                    return Ok(Some((Frame::StreamOpen(text.trim().to_string()), end)));
                }
                if depth == 0 {
                    stanza_start = pos;
                }
                depth += 1;
            }
            Ok(Event::Empty(_)) => {
                if depth == 0 {
                    let end = reader.buffer_position() as usize;
                    return Ok(Some((Frame::Stanza(slice(buf, pos, end)), end)));
                }
            }
            Ok(Event::End(e)) => {
                if depth == 0 {
                    if is_stream(e.name().local_name().as_ref()) {
                        return Ok(Some((Frame::StreamClose, reader.buffer_position() as usize)));
                    }
                    return Err(GatewayError::Protocol("unexpected end tag at stream level".into()));
                }
                depth -= 1;
                if depth == 0 {
                    let end = reader.buffer_position() as usize;
                    return Ok(Some((Frame::Stanza(slice(buf, stanza_start, end)), end)));
                }
            }
            Ok(Event::Eof) => return Ok(None),
            Ok(_) => {}
            Err(quick_xml::Error::Syntax(SyntaxError::UnclosedTag))
            | Err(quick_xml::Error::Syntax(SyntaxError::UnclosedPIOrXmlDecl))
            | Err(quick_xml::Error::Syntax(SyntaxError::UnclosedCData))
            | Err(quick_xml::Error::Syntax(SyntaxError::UnclosedComment)) => return Ok(None),
            Err(e) => return Err(e.into()),
        }
    }
}

fn slice(buf: &[u8], start: usize, end: usize) -> String {
    String::from_utf8_lossy(&buf[start..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_stream_open_and_stanzas() {
        let mut fb = FrameBuffer::new();
        fb.extend(b"<?xml version='1.0'?><stream:stream xmlns='jabber:client' \
            xmlns:stream='http://etherx.jabber.org/streams' id='s1' version='1.0'>\
            <stream:features><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/></stream:features>\
            <presence/>");

        match fb.next_frame().unwrap() {
            Some(Frame::StreamOpen(open)) => assert!(open.starts_with("<stream:stream")),
            other => panic!("unexpected frame: {other:?}"),
        }
        match fb.next_frame().unwrap() {
            Some(Frame::Stanza(s)) => {
                assert!(s.starts_with("<stream:features>"));
                assert!(s.ends_with("</stream:features>"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        assert_eq!(fb.next_frame().unwrap(), Some(Frame::Stanza("<presence/>".into())));
        assert_eq!(fb.next_frame().unwrap(), None);
    }

    #[test]
    fn waits_for_split_stanza() {
        let mut fb = FrameBuffer::new();
        fb.extend(b"<iq type='result' id='a1'><pubsub xmlns='http://jabber.org/protocol/pubsub'>");
        assert_eq!(fb.next_frame().unwrap(), None);
        fb.extend(b"</pubsub></iq>  <iq type='res");
        match fb.next_frame().unwrap() {
            Some(Frame::Stanza(s)) => assert!(s.ends_with("</pubsub></iq>")),
            other => panic!("unexpected frame: {other:?}"),
        }
        assert_eq!(fb.next_frame().unwrap(), None);
        fb.extend(b"ult' id='a2'/>");
        match fb.next_frame().unwrap() {
            Some(Frame::Stanza(s)) => assert_eq!(s, "<iq type='result' id='a2'/>"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn detects_stream_close() {
        let mut fb = FrameBuffer::new();
        fb.extend(b"</stream:stream>");
        assert_eq!(fb.next_frame().unwrap(), Some(Frame::StreamClose));
    }

    #[test]
    fn stream_close_after_open_and_stanza() {
        let mut fb = FrameBuffer::new();
        fb.extend(b"<stream:stream xmlns='jabber:client' \
            xmlns:stream='http://etherx.jabber.org/streams'><presence/></stream:stream>");
        assert!(matches!(fb.next_frame().unwrap(), Some(Frame::StreamOpen(_))));
        assert_eq!(fb.next_frame().unwrap(), Some(Frame::Stanza("<presence/>".into())));
        assert_eq!(fb.next_frame().unwrap(), Some(Frame::StreamClose));
        assert_eq!(fb.next_frame().unwrap(), None);
    }

    #[test]
    fn stray_end_tag_is_rejected() {
        let mut fb = FrameBuffer::new();
        fb.extend(b"</iq>");
        assert!(matches!(fb.next_frame(), Err(GatewayError::Protocol(_))));
    }
}
