//! AT port task and the cloneable [`AtPort`] handle.
//!
//! One tokio task owns each port's transport exclusively. Commands are
//! queued on a single FIFO channel and executed strictly one at a time: the
//! task frames the command, sends it, and accumulates reply bytes until the
//! response parser sees a final result code or the deadline passes. Every
//! inbound chunk, whether a transaction is in flight or the port is idle,
//! first goes through the port's [`UrcRegistry`] so unsolicited result codes
//! are dispatched and cut out before the reply is examined.
//!
//! The task never retries on its own. On timeout it clears its buffer,
//! reports [`Error::Timeout`], and serves the next request; callers decide
//! whether to retry (see [`crate::sequence::retry_with_delay`]).

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use regex::bytes::Regex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use modemlib_core::error::{Error, Result};
use modemlib_core::events::ModemEvent;
use modemlib_core::transport::Transport;
use modemlib_core::types::{PortInfo, PortRole};

use crate::protocol::{self, DecodeResult, DefaultResponseParser, ResponseParser};
use crate::urc::{UrcHandler, UrcRegistry};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Configuration for one AT port task.
#[derive(Debug, Clone)]
pub struct PortConfig {
    /// Device name used in logs and events.
    pub name: String,
    pub role: PortRole,
    /// Consecutive timeouts after which [`ModemEvent::PortUnresponsive`] is
    /// emitted. `0` disables the check.
    pub max_consecutive_timeouts: u32,
    /// How long an idle read waits before the loop re-checks its queue.
    pub idle_poll: Duration,
}

impl PortConfig {
    pub fn new(name: impl Into<String>, role: PortRole) -> Self {
        PortConfig {
            name: name.into(),
            role,
            max_consecutive_timeouts: 0,
            idle_poll: Duration::from_millis(100),
        }
    }
}

/// A single AT command transaction.
#[derive(Debug, Clone)]
pub struct AtCommand {
    /// Command text; framed with `AT` and `<CR>` unless `raw`.
    pub command: String,
    pub timeout: Duration,
    /// Serve a previously cached successful reply without touching the port.
    pub allow_cached: bool,
    /// Send the bytes verbatim.
    pub raw: bool,
}

impl AtCommand {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        AtCommand {
            command: command.into(),
            timeout,
            allow_cached: false,
            raw: false,
        }
    }

    pub fn cached(mut self, allow_cached: bool) -> Self {
        self.allow_cached = allow_cached;
        self
    }

    pub fn raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }
}

/// A request sent from the handle to the port task.
pub enum Request {
    Command {
        command: AtCommand,
        reply: oneshot::Sender<Result<String>>,
    },
    AddUrc {
        regex: Regex,
        handler: Option<UrcHandler>,
        reply: oneshot::Sender<()>,
    },
    SetUrcEnabled {
        pattern: String,
        enabled: bool,
        reply: oneshot::Sender<bool>,
    },
    ClearCache {
        reply: oneshot::Sender<()>,
    },
    /// Graceful shutdown; returns the transport for recovery.
    Shutdown {
        reply: oneshot::Sender<Box<dyn Transport>>,
    },
}

/// Cloneable handle to a running AT port task.
///
/// All clones talk to the same task; commands from different clones are
/// serialized in arrival order.
#[derive(Clone)]
pub struct AtPort {
    tx: mpsc::Sender<Request>,
    cancel: CancellationToken,
    info: Arc<PortInfo>,
    last_activity: Arc<Mutex<Option<Instant>>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for AtPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtPort").field("info", &self.info).finish()
    }
}

impl AtPort {
    /// Port identity.
    pub fn info(&self) -> &PortInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Instant the last transaction completed, if any.
    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity
            .lock()
            .map(|guard| *guard)
            .unwrap_or(None)
    }

    /// Send `command` with `timeout` and await the reply text.
    pub async fn command(&self, command: &str, timeout: Duration) -> Result<String> {
        self.command_full(AtCommand::new(command, timeout)).await
    }

    /// Send a fully specified command and await the reply text.
    pub async fn command_full(&self, command: AtCommand) -> Result<String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request::Command {
                command,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;

        // The task enforces the transaction deadline itself; a dropped
        // sender means the task is gone.
        reply_rx.await.map_err(|_| Error::NotConnected)?
    }

    /// Like [`command_full`](Self::command_full), but resolves with
    /// [`Error::Cancelled`] as soon as `cancel` fires.
    ///
    /// The port task still completes or times out the transaction, so the
    /// port is never left mid-frame.
    pub async fn command_cancellable(
        &self,
        command: AtCommand,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.command_full(command) => result,
        }
    }

    /// Register (or replace) a URC pattern on this port.
    pub async fn add_urc_handler(&self, regex: Regex, handler: Option<UrcHandler>) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request::AddUrc {
                regex,
                handler,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)
    }

    /// Enable or disable a registered URC pattern.
    ///
    /// Returns `false` if the pattern was never registered on this port.
    pub async fn set_urc_enabled(&self, pattern: &str, enabled: bool) -> Result<bool> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request::SetUrcEnabled {
                pattern: pattern.to_string(),
                enabled,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)
    }

    /// Drop all cached replies.
    pub async fn clear_cache(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request::ClearCache { reply: reply_tx })
            .await
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)
    }

    /// `true` while the port task is running.
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed() && !self.cancel.is_cancelled()
    }

    /// Shut down the port task and recover the transport.
    ///
    /// Every clone of this handle becomes unusable afterwards.
    pub async fn shutdown(&self) -> Result<Box<dyn Transport>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request::Shutdown { reply: reply_tx })
            .await
            .map_err(|_| Error::NotConnected)?;
        let transport = reply_rx.await.map_err(|_| Error::NotConnected)?;
        let task = self.task.lock().ok().and_then(|mut guard| guard.take());
        if let Some(task) = task {
            let _ = task.await;
        }
        Ok(transport)
    }
}

impl Drop for AtPort {
    fn drop(&mut self) {
        // Last handle gone: stop the task so the transport is released.
        if Arc::strong_count(&self.task) == 1 {
            self.cancel.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Spawn a port task using the default response parser.
pub fn spawn_port(
    transport: Box<dyn Transport>,
    config: PortConfig,
    event_tx: broadcast::Sender<ModemEvent>,
) -> AtPort {
    spawn_port_with_parser(transport, config, event_tx, Box::new(DefaultResponseParser))
}

/// Spawn a port task with a custom final result code recognizer.
pub fn spawn_port_with_parser(
    transport: Box<dyn Transport>,
    config: PortConfig,
    event_tx: broadcast::Sender<ModemEvent>,
    parser: Box<dyn ResponseParser>,
) -> AtPort {
    let (tx, rx) = mpsc::channel::<Request>(64);
    let cancel = CancellationToken::new();
    let last_activity = Arc::new(Mutex::new(None));
    let info = Arc::new(PortInfo {
        name: config.name.clone(),
        role: config.role,
    });

    let state = PortState {
        transport,
        config,
        event_tx,
        parser,
        urcs: UrcRegistry::new(),
        cache: HashMap::new(),
        buf: Vec::new(),
        consecutive_timeouts: 0,
        last_activity: Arc::clone(&last_activity),
    };
    let task = tokio::spawn(port_loop(state, rx, cancel.clone()));

    AtPort {
        tx,
        cancel,
        info,
        last_activity,
        task: Arc::new(Mutex::new(Some(task))),
    }
}

// ---------------------------------------------------------------------------
// Port loop
// ---------------------------------------------------------------------------

/// Maximum buffer size before reset to prevent unbounded growth from line
/// noise. AT replies rarely exceed a few hundred bytes.
const MAX_BUF: usize = 8192;

struct PortState {
    transport: Box<dyn Transport>,
    config: PortConfig,
    event_tx: broadcast::Sender<ModemEvent>,
    parser: Box<dyn ResponseParser>,
    urcs: UrcRegistry,
    cache: HashMap<String, String>,
    /// Bytes received but not yet attributed to a reply or a URC.
    buf: Vec<u8>,
    consecutive_timeouts: u32,
    last_activity: Arc<Mutex<Option<Instant>>>,
}

/// The main port loop.
///
/// Uses `tokio::select! { biased; }` to prioritize:
/// 1. Cancellation
/// 2. Queued requests
/// 3. Idle unsolicited data reading
async fn port_loop(
    mut state: PortState,
    mut rx: mpsc::Receiver<Request>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(port = %state.config.name, "AT port task cancelled");
                break;
            }

            req = rx.recv() => {
                match req {
                    Some(req) => {
                        if let ControlFlow::Break(reply) = state.handle_request(req).await {
                            debug!(port = %state.config.name, "AT port shutdown requested");
                            let _ = reply.send(state.transport);
                            return;
                        }
                    }
                    None => {
                        debug!(port = %state.config.name, "request channel closed, exiting");
                        break;
                    }
                }
            }

            _ = state.idle_read() => {}
        }
    }

    let _ = state.transport.close().await;
}

impl PortState {
    /// Serve one request; `Break` carries the reply channel of a shutdown.
    async fn handle_request(
        &mut self,
        req: Request,
    ) -> ControlFlow<oneshot::Sender<Box<dyn Transport>>> {
        match req {
            Request::Command { command, reply } => {
                let result = self.execute(&command).await;
                let _ = reply.send(result);
            }
            Request::AddUrc {
                regex,
                handler,
                reply,
            } => {
                self.urcs.add_handler(regex, handler);
                let _ = reply.send(());
            }
            Request::SetUrcEnabled {
                pattern,
                enabled,
                reply,
            } => {
                let found = self.urcs.set_enabled(&pattern, enabled);
                if !found {
                    debug!(port = %self.config.name, pattern, "no such URC pattern");
                }
                let _ = reply.send(found);
            }
            Request::ClearCache { reply } => {
                self.cache.clear();
                let _ = reply.send(());
            }
            Request::Shutdown { reply } => return ControlFlow::Break(reply),
        }
        ControlFlow::Continue(())
    }

    /// Idle: read unsolicited data and dispatch URCs.
    async fn idle_read(&mut self) {
        let mut chunk = [0u8; 256];
        match self.transport.receive(&mut chunk, self.config.idle_poll).await {
            Ok(n) if n > 0 => {
                self.buf.extend_from_slice(&chunk[..n]);
                if self.buf.len() > MAX_BUF {
                    warn!(
                        port = %self.config.name,
                        len = self.buf.len(),
                        "idle buffer overflow, resetting"
                    );
                    self.buf.clear();
                    return;
                }
                self.urcs.process(&mut self.buf);
                protocol::remove_echo(&mut self.buf);
                // Complete lines nobody claimed are noise; keep a trailing
                // partial line for the next read.
                if self.buf.len() > 2 && self.buf.ends_with(b"\r\n") {
                    debug!(
                        port = %self.config.name,
                        data = %String::from_utf8_lossy(&self.buf).escape_debug(),
                        "discarding unhandled unsolicited data"
                    );
                    self.buf.clear();
                }
            }
            _ => {
                // Timeout or error: yield briefly so the loop can check for
                // requests or cancellation.
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }

    /// Execute one transaction, applying the cache and timeout bookkeeping.
    async fn execute(&mut self, command: &AtCommand) -> Result<String> {
        if command.allow_cached {
            if let Some(cached) = self.cache.get(&command.command) {
                debug!(port = %self.config.name, command = %command.command, "serving cached reply");
                return Ok(cached.clone());
            }
        }

        let result = self.transact(command).await;
        self.touch();

        match &result {
            Ok(reply) => {
                self.consecutive_timeouts = 0;
                if command.allow_cached {
                    self.cache.insert(command.command.clone(), reply.clone());
                }
            }
            Err(Error::Timeout) => self.note_timeout(),
            Err(_) => self.consecutive_timeouts = 0,
        }

        debug!(
            port = %self.config.name,
            command = %command.command,
            ok = result.is_ok(),
            "AT transaction complete"
        );
        result
    }

    /// Send the command and accumulate bytes until a final result code.
    async fn transact(&mut self, command: &AtCommand) -> Result<String> {
        let frame = protocol::frame_command(&command.command, command.raw);
        debug!(
            port = %self.config.name,
            data = %String::from_utf8_lossy(&frame).escape_debug(),
            "--> "
        );
        self.transport.send(&frame).await?;

        let deadline = tokio::time::Instant::now() + command.timeout;
        let mut chunk = [0u8; 256];

        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                self.buf.clear();
                return Err(Error::Timeout);
            }

            match self.transport.receive(&mut chunk, deadline - now).await {
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);

                    if self.buf.len() > MAX_BUF {
                        warn!(
                            port = %self.config.name,
                            len = self.buf.len(),
                            "response buffer overflow, clearing"
                        );
                        self.buf.clear();
                        continue;
                    }

                    self.urcs.process(&mut self.buf);
                    protocol::remove_echo(&mut self.buf);

                    if let DecodeResult::Complete { result, body } = self.parser.parse(&self.buf)
                    {
                        debug!(
                            port = %self.config.name,
                            data = %String::from_utf8_lossy(&self.buf).escape_debug(),
                            "<-- "
                        );
                        self.buf.clear();
                        return result.into_result(body);
                    }
                }
                Err(Error::Timeout) => {
                    debug!(
                        port = %self.config.name,
                        command = %command.command,
                        pending = self.buf.len(),
                        "timed out waiting for final result code"
                    );
                    self.buf.clear();
                    return Err(Error::Timeout);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn touch(&self) {
        if let Ok(mut guard) = self.last_activity.lock() {
            *guard = Some(Instant::now());
        }
    }

    fn note_timeout(&mut self) {
        self.consecutive_timeouts += 1;
        let max = self.config.max_consecutive_timeouts;
        if max > 0 && self.consecutive_timeouts == max {
            warn!(
                port = %self.config.name,
                consecutive_timeouts = self.consecutive_timeouts,
                "port is unresponsive"
            );
            let _ = self.event_tx.send(ModemEvent::PortUnresponsive {
                port: self.config.name.clone(),
                consecutive_timeouts: self.consecutive_timeouts,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::urc::UrcMatch;
    use modemlib_core::error::MobileEquipmentError;
    use modemlib_test_harness::MockTransport;

    const T: Duration = Duration::from_millis(500);

    fn spawn(mock: MockTransport) -> (AtPort, broadcast::Receiver<ModemEvent>) {
        let (event_tx, event_rx) = broadcast::channel(16);
        let port = spawn_port(
            Box::new(mock),
            PortConfig::new("ttyUSB2", PortRole::Primary),
            event_tx,
        );
        (port, event_rx)
    }

    // =======================================================================
    // Type construction tests
    // =======================================================================

    #[test]
    fn port_config_defaults() {
        let config = PortConfig::new("ttyACM0", PortRole::Secondary);
        assert_eq!(config.name, "ttyACM0");
        assert_eq!(config.role, PortRole::Secondary);
        assert_eq!(config.max_consecutive_timeouts, 0);
        assert_eq!(config.idle_poll, Duration::from_millis(100));
    }

    #[test]
    fn at_command_builder() {
        let cmd = AtCommand::new("+CSQ", T).cached(true);
        assert!(cmd.allow_cached);
        assert!(!cmd.raw);
        let cmd = AtCommand::new("ATD*99#\r", T).raw(true);
        assert!(cmd.raw);
    }

    // =======================================================================
    // Handle tests (channel-level, no port loop)
    // =======================================================================

    #[tokio::test]
    async fn command_after_task_gone_is_not_connected() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let port = AtPort {
            tx,
            cancel: CancellationToken::new(),
            info: Arc::new(PortInfo {
                name: "x".into(),
                role: PortRole::Primary,
            }),
            last_activity: Arc::new(Mutex::new(None)),
            task: Arc::new(Mutex::new(None)),
        };
        let result = port.command("+CSQ", T).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    // =======================================================================
    // Port task: transactions
    // =======================================================================

    #[tokio::test]
    async fn basic_command() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CSQ\r", b"\r\n+CSQ: 20,99\r\n\r\nOK\r\n");
        let (port, _rx) = spawn(mock);

        let reply = port.command("+CSQ", T).await.unwrap();
        assert_eq!(reply, "+CSQ: 20,99");
        assert!(port.last_activity().is_some());
    }

    #[tokio::test]
    async fn echo_is_removed() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CGMI\r", b"AT+CGMI\r\r\nMediaTek\r\n\r\nOK\r\n");
        let (port, _rx) = spawn(mock);

        assert_eq!(port.command("+CGMI", T).await.unwrap(), "MediaTek");
    }

    #[tokio::test]
    async fn fragmented_reply_is_accumulated() {
        let mut mock = MockTransport::new();
        mock.set_chunk_size(4);
        mock.expect(b"AT+CFUN?\r", b"\r\n+CFUN: 1\r\n\r\nOK\r\n");
        let (port, _rx) = spawn(mock);

        assert_eq!(port.command("+CFUN?", T).await.unwrap(), "+CFUN: 1");
    }

    #[tokio::test]
    async fn cme_error_is_typed() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CPIN?\r", b"\r\n+CME ERROR: 10\r\n");
        let (port, _rx) = spawn(mock);

        let err = port.command("+CPIN?", T).await.unwrap_err();
        assert!(matches!(
            err,
            Error::MobileEquipment(MobileEquipmentError::SIM_NOT_INSERTED)
        ));
    }

    #[tokio::test]
    async fn timeout_then_next_command_succeeds() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+COPS=?\r", b"\r\n+COPS: (2,\"Op");
        mock.expect(b"AT\r", b"\r\nOK\r\n");
        let (port, _rx) = spawn(mock);

        let err = port.command("+COPS=?", T).await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
        // The partial reply must not leak into the next transaction.
        assert_eq!(port.command("", T).await.unwrap(), "");
    }

    #[tokio::test]
    async fn commands_are_serialized_in_order() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        for i in 0..3 {
            let cmd = format!("AT+X{i}\r");
            let reply = format!("\r\n+X: {i}\r\n\r\nOK\r\n");
            mock.expect(cmd.as_bytes(), reply.as_bytes());
        }
        let (port, _rx) = spawn(mock);

        // join! polls in argument order, so the requests are queued 0, 1, 2.
        let (r0, r1, r2) = tokio::join!(
            port.command("+X0", T),
            port.command("+X1", T),
            port.command("+X2", T),
        );
        assert_eq!(r0.unwrap(), "+X: 0");
        assert_eq!(r1.unwrap(), "+X: 1");
        assert_eq!(r2.unwrap(), "+X: 2");
        assert_eq!(handle.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn cached_reply_skips_transport() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.expect(b"AT+CGSN\r", b"\r\n359072060000000\r\n\r\nOK\r\n");
        let (port, _rx) = spawn(mock);

        let cmd = AtCommand::new("+CGSN", T).cached(true);
        assert_eq!(port.command_full(cmd.clone()).await.unwrap(), "359072060000000");
        assert_eq!(port.command_full(cmd).await.unwrap(), "359072060000000");
        assert_eq!(handle.sent_data().len(), 1);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CNUM\r", b"\r\nERROR\r\n");
        mock.expect(b"AT+CNUM\r", b"\r\n+CNUM: ,\"+15551234567\",145\r\n\r\nOK\r\n");
        let (port, _rx) = spawn(mock);

        let cmd = AtCommand::new("+CNUM", T).cached(true);
        assert!(port.command_full(cmd.clone()).await.is_err());
        assert!(port.command_full(cmd).await.is_ok());
    }

    #[tokio::test]
    async fn clear_cache_forces_resend() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.expect(b"AT+CIMI\r", b"\r\n001010123456789\r\n\r\nOK\r\n");
        mock.expect(b"AT+CIMI\r", b"\r\n001010123456789\r\n\r\nOK\r\n");
        let (port, _rx) = spawn(mock);

        let cmd = AtCommand::new("+CIMI", T).cached(true);
        port.command_full(cmd.clone()).await.unwrap();
        port.clear_cache().await.unwrap();
        port.command_full(cmd).await.unwrap();
        assert_eq!(handle.sent_data().len(), 2);
    }

    #[tokio::test]
    async fn raw_command_sent_verbatim() {
        let mut mock = MockTransport::new();
        mock.expect(b"ATD*99***1#\r", b"\r\nCONNECT 3600000\r\n");
        let (port, _rx) = spawn(mock);

        let cmd = AtCommand::new("ATD*99***1#\r", T).raw(true);
        assert_eq!(port.command_full(cmd).await.unwrap(), "CONNECT 3600000");
    }

    #[tokio::test]
    async fn cancellation_resolves_cancelled() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT\r", b"\r\nOK\r\n");
        let (port, _rx) = spawn(mock);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = port
            .command_cancellable(AtCommand::new("", T), &cancel)
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    // =======================================================================
    // Port task: URCs
    // =======================================================================

    #[tokio::test]
    async fn urc_inside_reply_is_dispatched_not_attributed() {
        let mut mock = MockTransport::new();
        mock.expect(
            b"AT+CSQ\r",
            b"\r\n+CSQ: 20,99\r\n\r\n+CREG: 5\r\n\r\nOK\r\n",
        );
        let (port, _rx) = spawn(mock);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let handler: UrcHandler = Arc::new(move |m: &UrcMatch| {
            seen2.lock().unwrap().push(m.get_u32(1));
        });
        port.add_urc_handler(Regex::new(r"\r\n\+CREG: (\d)\r\n").unwrap(), Some(handler))
            .await
            .unwrap();

        assert_eq!(port.command("+CSQ", T).await.unwrap(), "+CSQ: 20,99");
        assert_eq!(*seen.lock().unwrap(), vec![Some(5)]);
    }

    #[tokio::test]
    async fn idle_urc_is_dispatched() {
        let mock = MockTransport::new();
        let handle = mock.handle();
        let (port, _rx) = spawn(mock);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler: UrcHandler = Arc::new(move |m: &UrcMatch| {
            let _ = tx.send(m.get(1).map(str::to_string));
        });
        port.add_urc_handler(
            Regex::new(r#"\r\n\+CMTI: "(\w+)",(\d+)\r\n"#).unwrap(),
            Some(handler),
        )
        .await
        .unwrap();

        handle.push_unsolicited(b"\r\n+CMTI: \"SM\",3\r\n");
        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(got, Some(Some("SM".to_string())));
    }

    #[tokio::test]
    async fn disabled_urc_is_not_dispatched() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT\r", b"\r\nOK\r\n");
        let handle = mock.handle();
        let (port, _rx) = spawn(mock);

        let hits = Arc::new(Mutex::new(0));
        let hits2 = Arc::clone(&hits);
        let handler: UrcHandler = Arc::new(move |_: &UrcMatch| {
            *hits2.lock().unwrap() += 1;
        });
        let pattern = r"\r\nRING\r\n";
        port.add_urc_handler(Regex::new(pattern).unwrap(), Some(handler))
            .await
            .unwrap();
        assert!(port.set_urc_enabled(pattern, false).await.unwrap());
        assert!(!port.set_urc_enabled("unknown", false).await.unwrap());

        handle.push_unsolicited(b"\r\nRING\r\n");
        // A round trip guarantees the idle read already ran.
        tokio::time::sleep(Duration::from_millis(50)).await;
        port.command("", T).await.unwrap();
        assert_eq!(*hits.lock().unwrap(), 0);
    }

    // =======================================================================
    // Port health
    // =======================================================================

    #[tokio::test]
    async fn consecutive_timeouts_emit_unresponsive_once() {
        let mut mock = MockTransport::new();
        for _ in 0..4 {
            mock.expect(b"AT\r", b"");
        }
        let (event_tx, mut event_rx) = broadcast::channel(16);
        let mut config = PortConfig::new("ttyUSB0", PortRole::Primary);
        config.max_consecutive_timeouts = 3;
        let port = spawn_port(Box::new(mock), config, event_tx);

        for _ in 0..4 {
            assert!(matches!(port.command("", T).await, Err(Error::Timeout)));
        }

        let event = event_rx.try_recv().unwrap();
        assert_eq!(
            event,
            ModemEvent::PortUnresponsive {
                port: "ttyUSB0".into(),
                consecutive_timeouts: 3,
            }
        );
        assert!(event_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reply_resets_timeout_counter() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT\r", b"");
        mock.expect(b"AT\r", b"\r\nOK\r\n");
        mock.expect(b"AT\r", b"");
        let (event_tx, mut event_rx) = broadcast::channel(16);
        let mut config = PortConfig::new("ttyUSB0", PortRole::Primary);
        config.max_consecutive_timeouts = 2;
        let port = spawn_port(Box::new(mock), config, event_tx);

        let _ = port.command("", T).await;
        port.command("", T).await.unwrap();
        let _ = port.command("", T).await;
        assert!(event_rx.try_recv().is_err());
    }

    // =======================================================================
    // Shutdown
    // =======================================================================

    #[tokio::test]
    async fn shutdown_recovers_transport() {
        let mock = MockTransport::new();
        let (port, _rx) = spawn(mock);

        let transport = port.shutdown().await.unwrap();
        assert!(transport.is_connected());
        assert!(matches!(port.command("", T).await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn shutdown_waits_for_queued_command() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.expect(b"ATI\r", b"\r\nModel X\r\n\r\nOK\r\n");
        let (port, _rx) = spawn(mock);

        let queued = port.clone();
        let command = tokio::spawn(async move { queued.command("I", T).await });
        tokio::task::yield_now().await;
        let transport = port.shutdown().await.unwrap();

        assert_eq!(command.await.unwrap().unwrap(), "Model X");
        assert!(transport.is_connected());
        assert_eq!(handle.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn buffer_overflow_resyncs() {
        let mut mock = MockTransport::new();
        // 33 full reads of noise: the 33rd pushes the buffer past MAX_BUF.
        let mut garbage = vec![b'x'; 33 * 256];
        garbage.extend_from_slice(b"\r\nOK\r\n");
        mock.expect(b"AT\r", &garbage);
        mock.expect(b"AT\r", b"\r\nOK\r\n");
        let (port, _rx) = spawn(mock);

        // The oversized reply is discarded; its trailing OK arrives after the
        // reset and still completes the transaction.
        assert!(port.command("", T).await.is_ok());
        assert!(port.command("", T).await.is_ok());
    }
}
