//! Mock transport for deterministic testing of the AT protocol engine.
//!
//! [`MockTransport`] implements the [`Transport`] trait with scripted
//! request/response pairs. Responses can be split into arbitrary chunks to
//! exercise partial framing, and unsolicited bytes can be injected at any
//! time through a [`MockHandle`], even after the transport has been moved
//! into an IO task.
//!
//! # Example
//!
//! ```
//! use modemlib_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! // When the engine writes this command, answer with this response.
//! mock.expect(b"AT+CREG?\r", b"\r\n+CREG: 0,1\r\n\r\nOK\r\n");
//! // Deliver a response in two reads, split inside the final code.
//! mock.expect_chunks(b"AT\r", &[b"\r\nO", b"K\r\n"]);
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use modemlib_core::error::{Error, Result};
use modemlib_core::transport::Transport;

/// Longest a `receive()` with nothing queued waits before timing out.
const IDLE_WAIT: Duration = Duration::from_millis(5);

/// A scripted request and the chunks delivered once it is seen.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// Chunks to return, one per `receive()` call, after the request is sent.
    response: Vec<Vec<u8>>,
}

/// State shared between the transport and its handles.
#[derive(Debug, Default)]
struct Shared {
    /// Bytes waiting to be read, one element per read.
    inbound: VecDeque<Vec<u8>>,
    /// Log of all bytes sent through the transport.
    sent_log: Vec<Vec<u8>>,
}

/// A mock [`Transport`] for testing without hardware.
///
/// Expectations are consumed in order. When `send()` is called, the sent
/// data is recorded and matched against the next expectation; its response
/// chunks are appended to the inbound queue and returned by subsequent
/// `receive()` calls. A mismatch or an exhausted expectation queue fails
/// the `send()` with [`Error::Transport`].
#[derive(Debug)]
pub struct MockTransport {
    expectations: VecDeque<Expectation>,
    shared: Arc<Mutex<Shared>>,
    connected: bool,
}

/// Cloneable handle onto a [`MockTransport`]'s inbound queue and sent log.
#[derive(Debug, Clone)]
pub struct MockHandle {
    shared: Arc<Mutex<Shared>>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    // A panicking test thread must not hide the log from other assertions.
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            expectations: VecDeque::new(),
            shared: Arc::new(Mutex::new(Shared::default())),
            connected: true,
        }
    }

    /// Add an expected request/response pair.
    ///
    /// When `send()` is called with data matching `request`, the subsequent
    /// `receive()` calls return `response`. An empty response means the
    /// device stays silent (useful for timeout tests).
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        let response = if response.is_empty() {
            Vec::new()
        } else {
            vec![response.to_vec()]
        };
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            response,
        });
    }

    /// Add an expected request whose response arrives split across reads.
    pub fn expect_chunks(&mut self, request: &[u8], chunks: &[&[u8]]) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            response: chunks.iter().map(|c| c.to_vec()).collect(),
        });
    }

    /// Queue unsolicited bytes for the next `receive()`.
    pub fn inject(&self, data: &[u8]) {
        self.handle().inject(data);
    }

    /// A handle that stays usable after the transport is moved into a task.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Return a copy of all data that has been sent through this transport.
    ///
    /// Each element is the byte slice from one `send()` call.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.handle().sent_data()
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }

    /// Set the connected state of the mock transport.
    ///
    /// When set to `false`, subsequent `send()` and `receive()` calls will
    /// return [`Error::NotConnected`].
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHandle {
    /// Queue unsolicited bytes for the next `receive()`.
    pub fn inject(&self, data: &[u8]) {
        if !data.is_empty() {
            lock(&self.shared).inbound.push_back(data.to_vec());
        }
    }

    /// Return a copy of everything sent so far, one element per `send()`.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        lock(&self.shared).sent_log.clone()
    }

    /// Sent data rendered as (lossy) UTF-8 strings, for readable assertions.
    pub fn sent_strings(&self) -> Vec<String> {
        lock(&self.shared)
            .sent_log
            .iter()
            .map(|d| String::from_utf8_lossy(d).into_owned())
            .collect()
    }

    /// Number of times exactly `data` was sent.
    pub fn sent_count(&self, data: &[u8]) -> usize {
        lock(&self.shared)
            .sent_log
            .iter()
            .filter(|d| d.as_slice() == data)
            .count()
    }

    /// Whether any bytes are still queued for reading.
    pub fn has_pending_input(&self) -> bool {
        !lock(&self.shared).inbound.is_empty()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        let mut shared = lock(&self.shared);
        shared.sent_log.push(data.to_vec());

        let Some(expectation) = self.expectations.pop_front() else {
            return Err(Error::Transport(format!(
                "no more expectations in mock transport (sent {:?})",
                String::from_utf8_lossy(data)
            )));
        };
        if data != expectation.request.as_slice() {
            return Err(Error::Transport(format!(
                "unexpected send data: expected {:?}, got {:?}",
                String::from_utf8_lossy(&expectation.request),
                String::from_utf8_lossy(data)
            )));
        }
        shared.inbound.extend(expectation.response);
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        {
            let mut shared = lock(&self.shared);
            if let Some(front) = shared.inbound.front_mut() {
                let n = front.len().min(buf.len());
                buf[..n].copy_from_slice(&front[..n]);
                if n == front.len() {
                    shared.inbound.pop_front();
                } else {
                    front.drain(..n);
                }
                return Ok(n);
            }
        }

        tokio::time::sleep(timeout.min(IDLE_WAIT)).await;
        Err(Error::Timeout {
            command: "receive".into(),
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        lock(&self.shared).inbound.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
