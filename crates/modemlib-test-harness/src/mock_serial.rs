//! Mock transport for deterministic testing of the AT engine.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/response pairs. Each `send()` is matched against the next
//! expectation; its response is then returned by the following `receive()`
//! calls. Unsolicited data queued with [`MockHandle::push_unsolicited`] is
//! returned by `receive()` whenever no response is pending.
//!
//! # Example
//!
//! ```
//! use modemlib_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! mock.expect(b"AT+CSQ\r", b"\r\n+CSQ: 20,99\r\n\r\nOK\r\n");
//! let handle = mock.handle();
//! handle.push_unsolicited(b"\r\n+CREG: 1\r\n");
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use modemlib_core::error::{Error, Result};
use modemlib_core::transport::Transport;

/// A pre-loaded request/response pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    request: Vec<u8>,
    /// Empty to simulate a modem that never answers.
    response: Vec<u8>,
}

#[derive(Debug)]
struct MockState {
    expectations: VecDeque<Expectation>,
    pending_response: Option<Vec<u8>>,
    response_cursor: usize,
    unsolicited: VecDeque<Vec<u8>>,
    /// Maximum bytes returned by one `receive()`; `0` means unlimited.
    chunk_size: usize,
    connected: bool,
    sent_log: Vec<Vec<u8>>,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    // A panicking test thread must not hide the state from the assertions
    // that follow it.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A mock [`Transport`] for testing protocol engines without hardware.
///
/// If a sent request does not match the next expectation, or the queue is
/// exhausted, `send()` returns [`Error::Protocol`].
#[derive(Debug)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

/// Shared view of a [`MockTransport`] that outlives the move of the
/// transport into a port task.
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            state: Arc::new(Mutex::new(MockState {
                expectations: VecDeque::new(),
                pending_response: None,
                response_cursor: 0,
                unsolicited: VecDeque::new(),
                chunk_size: 0,
                connected: true,
                sent_log: Vec::new(),
            })),
        }
    }

    /// Add an expected request/response pair.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.handle().expect(request, response);
    }

    /// Return a handle sharing this transport's state.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Return all data sent through this transport, one entry per `send()`.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.handle().sent_data()
    }

    /// Return the number of expectations not yet consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.handle().remaining_expectations()
    }

    /// Set the connected state of the mock transport.
    ///
    /// When `false`, `send()` and `receive()` return [`Error::NotConnected`].
    pub fn set_connected(&mut self, connected: bool) {
        lock(&self.state).connected = connected;
    }

    /// Limit how many bytes a single `receive()` returns, to exercise
    /// accumulation of fragmented replies.
    pub fn set_chunk_size(&mut self, chunk_size: usize) {
        lock(&self.state).chunk_size = chunk_size;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHandle {
    /// Add an expected request/response pair.
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        lock(&self.state).expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Queue bytes the modem sends on its own (unsolicited result codes).
    pub fn push_unsolicited(&self, data: &[u8]) {
        lock(&self.state).unsolicited.push_back(data.to_vec());
    }

    /// Return all data sent so far, one entry per `send()`.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        lock(&self.state).sent_log.clone()
    }

    /// Return the sent data decoded as (lossy) UTF-8 strings.
    pub fn sent_strings(&self) -> Vec<String> {
        lock(&self.state)
            .sent_log
            .iter()
            .map(|d| String::from_utf8_lossy(d).into_owned())
            .collect()
    }

    /// Return the number of expectations not yet consumed.
    pub fn remaining_expectations(&self) -> usize {
        lock(&self.state).expectations.len()
    }

    /// Return the number of queued unsolicited chunks not yet delivered.
    pub fn pending_unsolicited(&self) -> usize {
        lock(&self.state).unsolicited.len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(Error::NotConnected);
        }

        state.sent_log.push(data.to_vec());

        match state.expectations.pop_front() {
            Some(expectation) => {
                if data != expectation.request.as_slice() {
                    return Err(Error::Protocol(format!(
                        "unexpected send data: expected {:?}, got {:?}",
                        String::from_utf8_lossy(&expectation.request),
                        String::from_utf8_lossy(data)
                    )));
                }
                state.pending_response = Some(expectation.response);
                state.response_cursor = 0;
                Ok(())
            }
            None => Err(Error::Protocol(
                "no more expectations in mock transport".into(),
            )),
        }
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(Error::NotConnected);
        }

        let limit = match state.chunk_size {
            0 => buf.len(),
            n => n.min(buf.len()),
        };

        if let Some(response) = state.pending_response.take() {
            let remaining = &response[state.response_cursor..];
            if remaining.is_empty() {
                state.response_cursor = 0;
                return Err(Error::Timeout);
            }
            let n = remaining.len().min(limit);
            buf[..n].copy_from_slice(&remaining[..n]);
            state.response_cursor += n;
            if state.response_cursor >= response.len() {
                state.response_cursor = 0;
            } else {
                state.pending_response = Some(response);
            }
            return Ok(n);
        }

        if let Some(mut chunk) = state.unsolicited.pop_front() {
            if chunk.len() > limit {
                let rest = chunk.split_off(limit);
                state.unsolicited.push_front(rest);
            }
            buf[..chunk.len()].copy_from_slice(&chunk);
            return Ok(chunk.len());
        }

        Err(Error::Timeout)
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.connected = false;
        state.pending_response = None;
        state.response_cursor = 0;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }
}
