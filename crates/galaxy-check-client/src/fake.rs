//! Scripted in-memory transport for unit tests.

use crate::{ClientError, Method, RequestResult, Transport};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::Write;

/// Replies from per-URL queues. The last queued reply for a URL repeats once
/// the queue is down to one entry; unknown URLs answer 404.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: RefCell<HashMap<String, VecDeque<RequestResult>>>,
    downloads: RefCell<HashMap<String, Result<Vec<u8>, String>>>,
    calls: RefCell<Vec<(Method, String)>>,
    uploads: RefCell<Vec<(String, String, Vec<u8>)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, url: &str, status: u16, body: Value) -> Self {
        self.push(url, RequestResult::json(status, body))
    }

    pub fn push(self, url: &str, result: RequestResult) -> Self {
        self.replies
            .borrow_mut()
            .entry(url.to_owned())
            .or_default()
            .push_back(result);
        self
    }

    pub fn serve_file(self, url: &str, data: &[u8]) -> Self {
        self.downloads
            .borrow_mut()
            .insert(url.to_owned(), Ok(data.to_vec()));
        self
    }

    pub fn fail_file(self, url: &str, message: &str) -> Self {
        self.downloads
            .borrow_mut()
            .insert(url.to_owned(), Err(message.to_owned()));
        self
    }

    pub fn calls(&self) -> Vec<(Method, String)> {
        self.calls.borrow().clone()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.borrow().iter().filter(|(_, u)| u == url).count()
    }

    pub fn uploads(&self) -> Vec<(String, String, Vec<u8>)> {
        self.uploads.borrow().clone()
    }

    fn next(&self, url: &str) -> RequestResult {
        let mut replies = self.replies.borrow_mut();
        match replies.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(not_found),
            Some(queue) => queue.front().cloned().unwrap_or_else(not_found),
            None => not_found(),
        }
    }
}

fn not_found() -> RequestResult {
    RequestResult::json(404, serde_json::json!({"detail": "Not found."}))
}

impl Transport for ScriptedTransport {
    fn request(&self, method: Method, url: &str, _body: Option<&Value>) -> RequestResult {
        self.calls.borrow_mut().push((method, url.to_owned()));
        self.next(url)
    }

    fn send_bytes(&self, url: &str, content_type: &str, body: &[u8]) -> RequestResult {
        self.calls.borrow_mut().push((Method::Post, url.to_owned()));
        self.uploads
            .borrow_mut()
            .push((url.to_owned(), content_type.to_owned(), body.to_vec()));
        self.next(url)
    }

    fn fetch_to(&self, url: &str, sink: &mut dyn Write) -> Result<u64, ClientError> {
        self.calls.borrow_mut().push((Method::Get, url.to_owned()));
        match self.downloads.borrow().get(url) {
            Some(Ok(data)) => {
                sink.write_all(data)?;
                Ok(data.len() as u64)
            }
            Some(Err(msg)) => Err(ClientError::Http(msg.clone())),
            None => Err(ClientError::Http(format!("HTTP 404 for {url}"))),
        }
    }
}
