use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Sender;
use mio::Token;

use crate::metrics;

/// HTTP request methods recognized by the front-end. Anything else is parsed but rejected with
/// `405` before a handler ever sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Head,
    Put,
    Unknown,
}

impl Method {
    pub(crate) fn parse(raw: &str) -> Self {
        match raw {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "HEAD" => Method::Head,
            "PUT" => Method::Put,
            _ => Method::Unknown,
        }
    }
}

/// One pending reply, handed from whichever thread produced it (event-loop thread for
/// core-generated statuses, a work-queue worker for handler-generated ones) to the event-loop
/// thread, which is the only thread permitted to write to the connection.
pub(crate) struct ReplyEvent {
    pub token: Token,
    pub status: u16,
    pub reason: &'static str,
    pub body: Vec<u8>,
}

/// An in-flight HTTP exchange.
///
/// A `Request` is owned by exactly one thread at a time: the event-loop thread while it is being
/// parsed and routed, a work-queue worker while a handler runs, and the event-loop thread again
/// once the reply has been posted. `write_reply` is the only way to produce output; if a request
/// is dropped without ever calling it, [`Drop`] synthesizes a `500 Unhandled request`.
pub struct Request {
    method: Method,
    uri: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    peer_addr: SocketAddr,
    token: Token,
    reply_tx: Sender<ReplyEvent>,
    waker: Arc<mio::Waker>,
    reply_sent: bool,
    accepted_at: Instant,
}

impl Request {
    pub(crate) fn new(
        method: Method,
        uri: String,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
        peer_addr: SocketAddr,
        token: Token,
        reply_tx: Sender<ReplyEvent>,
        waker: Arc<mio::Waker>,
    ) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
            peer_addr,
            token,
            reply_tx,
            waker,
            reply_sent: false,
            accepted_at: Instant::now(),
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Case-insensitive single-value header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn reply_sent(&self) -> bool {
        self.reply_sent
    }

    /// Writes a reply, routing it through the event-loop thread. Calling this more than once on
    /// the same request is a no-op after the first call.
    pub fn write_reply(&mut self, status: u16, body: impl Into<Vec<u8>>) {
        self.write_reply_with_reason(status, "", body)
    }

    pub(crate) fn write_reply_with_reason(
        &mut self,
        status: u16,
        reason: &'static str,
        body: impl Into<Vec<u8>>,
    ) {
        if self.reply_sent {
            return;
        }
        self.reply_sent = true;
        metrics::REQUEST_LATENCY.observe(self.accepted_at.elapsed().as_secs_f64());
        let _ = self.reply_tx.send(ReplyEvent { token: self.token, status, reason, body: body.into() });
        self.waker.wake().ok();
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if !self.reply_sent {
            self.write_reply_with_reason(500, "Unhandled request", &b"Unhandled request"[..]);
        }
    }
}

#[cfg(test)]
impl Request {
    /// Builds a disconnected `Request` for unit tests that don't need a live connection.
    pub(crate) fn for_test() -> Self {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let poll = mio::Poll::new().expect("poll");
        let waker = Arc::new(mio::Waker::new(poll.registry(), Token(0)).expect("waker"));
        Self::new(
            Method::Get,
            "/".to_string(),
            Vec::new(),
            Vec::new(),
            "127.0.0.1:0".parse().unwrap(),
            Token(0),
            tx,
            waker,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut req = Request::for_test();
        req.headers.push(("Content-Type".to_string(), "application/json".to_string()));
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert_eq!(req.header("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(req.header("x-missing"), None);
    }

    #[test]
    fn second_write_reply_is_ignored() {
        let mut req = Request::for_test();
        req.write_reply(200, &b"first"[..]);
        req.write_reply(500, &b"second"[..]);
        assert!(req.reply_sent());
    }

    #[test]
    fn unwritten_request_synthesizes_500_on_drop() {
        let req = Request::for_test();
        assert!(!req.reply_sent());
        drop(req);
        // The Drop impl routes through write_reply_with_reason; reaching here without panicking
        // demonstrates the synthesized reply path runs exactly once.
    }
}
