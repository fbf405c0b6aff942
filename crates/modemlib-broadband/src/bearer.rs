//! Packet data bearers.
//!
//! A [`Bearer`] is one requested data session. Its connection state machine
//! runs disconnected -> connecting -> connected -> disconnecting ->
//! disconnected. The vendor's [`ModemOps::connect_bearer`] does the dialing;
//! the bearer owns cancellation, statistics, and state publication.
//!
//! A connect can be cancelled until the dial transaction completes. If the
//! dial succeeds after cancellation was requested, the session is torn down
//! again and the connect reports [`Error::Cancelled`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use modemlib_core::error::{Error, Result};
use modemlib_core::events::ModemEvent;
use modemlib_core::types::{BearerProperties, BearerStats, BearerStatus, IpConfig};

use crate::ops::{ConnectRequest, ModemOps};
use crate::status::StatusStore;

#[derive(Debug, Default)]
struct BearerInner {
    status: BearerStatus,
    ipv4: Option<IpConfig>,
    ipv6: Option<IpConfig>,
    data_port: Option<String>,
    stats: BearerStats,
    connected_at: Option<Instant>,
    last_error: Option<String>,
    /// Cancels the connect in flight.
    connect_cancel: Option<CancellationToken>,
}

fn lock(inner: &Mutex<BearerInner>) -> MutexGuard<'_, BearerInner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One packet data session of a modem.
pub struct Bearer {
    id: u32,
    cid: u32,
    properties: BearerProperties,
    ops: Arc<dyn ModemOps>,
    store: StatusStore,
    inner: Mutex<BearerInner>,
    status_tx: watch::Sender<BearerStatus>,
}

impl std::fmt::Debug for Bearer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bearer")
            .field("id", &self.id)
            .field("cid", &self.cid)
            .field("status", &self.status())
            .finish()
    }
}

impl Bearer {
    pub fn new(
        id: u32,
        cid: u32,
        properties: BearerProperties,
        ops: Arc<dyn ModemOps>,
        store: StatusStore,
    ) -> Self {
        let (status_tx, _) = watch::channel(BearerStatus::Disconnected);
        Bearer {
            id,
            cid,
            properties,
            ops,
            store,
            inner: Mutex::new(BearerInner::default()),
            status_tx,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// PDP context id dialed for this bearer.
    pub fn cid(&self) -> u32 {
        self.cid
    }

    pub fn properties(&self) -> &BearerProperties {
        &self.properties
    }

    pub fn status(&self) -> BearerStatus {
        lock(&self.inner).status
    }

    /// Watch the connection status.
    pub fn watch_status(&self) -> watch::Receiver<BearerStatus> {
        self.status_tx.subscribe()
    }

    pub fn ipv4_config(&self) -> Option<IpConfig> {
        lock(&self.inner).ipv4.clone()
    }

    pub fn ipv6_config(&self) -> Option<IpConfig> {
        lock(&self.inner).ipv6.clone()
    }

    /// Port carrying the data session while connected.
    pub fn data_port(&self) -> Option<String> {
        lock(&self.inner).data_port.clone()
    }

    /// Message of the last failed connect.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.inner).last_error.clone()
    }

    /// Statistics, with the duration of a live session measured up to now.
    pub fn stats(&self) -> BearerStats {
        let inner = lock(&self.inner);
        let mut stats = inner.stats.clone();
        if let Some(since) = inner.connected_at {
            stats.duration = since.elapsed();
        }
        stats
    }

    pub async fn connect(&self) -> Result<()> {
        self.connect_cancellable(&CancellationToken::new()).await
    }

    /// Connect; `cancel` (or a concurrent [`disconnect`](Self::disconnect))
    /// aborts the attempt.
    pub async fn connect_cancellable(&self, cancel: &CancellationToken) -> Result<()> {
        let token = cancel.child_token();
        {
            let mut inner = lock(&self.inner);
            match inner.status {
                BearerStatus::Connected => return Ok(()),
                BearerStatus::Connecting => {
                    return Err(Error::InProgress("bearer is connecting".into()));
                }
                BearerStatus::Disconnecting => {
                    return Err(Error::WrongState("bearer is disconnecting".into()));
                }
                BearerStatus::Disconnected => {}
            }
            if !self.properties.allow_roaming && self.store.read(|s| s.is_roaming()) {
                return Err(Error::Unauthorized(
                    "roaming is not allowed for this bearer".into(),
                ));
            }
            inner.status = BearerStatus::Connecting;
            inner.stats.attempts += 1;
            inner.last_error = None;
            inner.connect_cancel = Some(token.clone());
        }
        self.publish(BearerStatus::Connecting);

        let request = ConnectRequest {
            properties: self.properties.clone(),
            cid: self.cid,
        };
        let result = self.ops.connect_bearer(&request, &token).await;

        let result = match result {
            Ok(_) if token.is_cancelled() => {
                debug!(bearer = self.id, "connect completed after cancellation, tearing down");
                if let Err(e) = self.ops.disconnect_bearer(self.cid).await {
                    warn!(bearer = self.id, error = %e, "teardown after cancellation failed");
                }
                Err(Error::Cancelled)
            }
            other => other,
        };

        match result {
            Ok(connected) => {
                {
                    let mut inner = lock(&self.inner);
                    inner.status = BearerStatus::Connected;
                    inner.ipv4 = connected.ipv4;
                    inner.ipv6 = connected.ipv6;
                    inner.data_port = connected.data_port;
                    inner.connected_at = Some(Instant::now());
                    inner.stats.duration = Duration::ZERO;
                    inner.connect_cancel = None;
                }
                info!(
                    bearer = self.id,
                    cid = self.cid,
                    apn = self.properties.apn.as_deref().unwrap_or(""),
                    "bearer connected"
                );
                self.publish(BearerStatus::Connected);
                self.store.bearer_connected(true);
                Ok(())
            }
            Err(e) => {
                {
                    let mut inner = lock(&self.inner);
                    inner.status = BearerStatus::Disconnected;
                    inner.stats.failed_attempts += 1;
                    inner.last_error = Some(e.to_string());
                    inner.connect_cancel = None;
                }
                warn!(bearer = self.id, error = %e, "bearer connection failed");
                self.publish(BearerStatus::Disconnected);
                Err(e)
            }
        }
    }

    /// Disconnect. A disconnected bearer succeeds immediately; a connecting
    /// one has its connect cancelled.
    pub async fn disconnect(&self) -> Result<()> {
        let status = {
            let inner = lock(&self.inner);
            if inner.status == BearerStatus::Connecting {
                if let Some(token) = &inner.connect_cancel {
                    token.cancel();
                }
            }
            inner.status
        };

        match status {
            BearerStatus::Disconnected => Ok(()),
            BearerStatus::Connecting => {
                // Wait for the cancelled connect to settle.
                let mut rx = self.status_tx.subscribe();
                rx.wait_for(|s| {
                    matches!(s, BearerStatus::Disconnected | BearerStatus::Connected)
                })
                .await
                .map_err(|_| Error::ConnectionLost)?;
                if self.status() == BearerStatus::Connected {
                    return self.hang_up().await;
                }
                Ok(())
            }
            BearerStatus::Disconnecting => {
                Err(Error::InProgress("bearer is disconnecting".into()))
            }
            BearerStatus::Connected => self.hang_up().await,
        }
    }

    async fn hang_up(&self) -> Result<()> {
        lock(&self.inner).status = BearerStatus::Disconnecting;
        self.publish(BearerStatus::Disconnecting);

        if let Err(e) = self.ops.disconnect_bearer(self.cid).await {
            warn!(bearer = self.id, error = %e, "disconnect failed");
            lock(&self.inner).status = BearerStatus::Connected;
            self.publish(BearerStatus::Connected);
            return Err(e);
        }

        {
            let mut inner = lock(&self.inner);
            if let Some(since) = inner.connected_at.take() {
                let duration = since.elapsed();
                inner.stats.duration = duration;
                inner.stats.total_duration += duration;
            }
            inner.status = BearerStatus::Disconnected;
            inner.ipv4 = None;
            inner.ipv6 = None;
            inner.data_port = None;
        }
        info!(bearer = self.id, "bearer disconnected");
        self.publish(BearerStatus::Disconnected);
        self.store.bearer_connected(false);
        Ok(())
    }

    fn publish(&self, status: BearerStatus) {
        self.status_tx.send_replace(status);
        self.store.emit(ModemEvent::BearerStatusChanged {
            bearer_id: self.id,
            status,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generic::Generic;
    use crate::test_support::generic_with;
    use async_trait::async_trait;
    use modemlib_core::types::{ConnectResult, ModemState, RegistrationDomain, RegistrationState3gpp};
    use modemlib_test_harness::MockTransport;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Dials by sleeping instead of talking to the port.
    struct SlowDial {
        generic: Generic,
        delay: Duration,
        fail: bool,
        hangups: AtomicU32,
    }

    #[async_trait]
    impl ModemOps for SlowDial {
        fn generic(&self) -> &Generic {
            &self.generic
        }

        async fn connect_bearer(
            &self,
            _request: &ConnectRequest,
            _cancel: &CancellationToken,
        ) -> Result<ConnectResult> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(Error::Connection("no service".into()));
            }
            Ok(ConnectResult {
                ipv4: Some(IpConfig::ppp()),
                ipv6: None,
                data_port: Some("ttyUSB0".into()),
            })
        }

        async fn disconnect_bearer(&self, _cid: u32) -> Result<()> {
            self.hangups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn bearer(fail: bool, properties: BearerProperties) -> (Arc<Bearer>, Arc<SlowDial>) {
        let (generic, _rx) = generic_with(MockTransport::new(), None);
        let store = generic.status().clone();
        let ops = Arc::new(SlowDial {
            generic,
            delay: Duration::from_secs(5),
            fail,
            hangups: AtomicU32::new(0),
        });
        let bearer = Arc::new(Bearer::new(0, 1, properties, ops.clone(), store));
        (bearer, ops)
    }

    // =======================================================================
    // Connect / disconnect
    // =======================================================================

    #[tokio::test(start_paused = true)]
    async fn connect_then_disconnect() {
        let (bearer, ops) = bearer(false, BearerProperties::default());

        bearer.connect().await.unwrap();
        assert_eq!(bearer.status(), BearerStatus::Connected);
        assert_eq!(bearer.ipv4_config(), Some(IpConfig::ppp()));
        assert_eq!(bearer.data_port().as_deref(), Some("ttyUSB0"));
        assert_eq!(bearer.stats().attempts, 1);

        // Connecting again is a no-op.
        bearer.connect().await.unwrap();
        assert_eq!(bearer.stats().attempts, 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        bearer.disconnect().await.unwrap();
        assert_eq!(bearer.status(), BearerStatus::Disconnected);
        assert_eq!(bearer.ipv4_config(), None);
        assert_eq!(ops.hangups.load(Ordering::SeqCst), 1);

        let stats = bearer.stats();
        assert_eq!(stats.duration, Duration::from_secs(30));
        assert_eq!(stats.total_duration, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn disconnect_when_disconnected_is_noop() {
        let (bearer, ops) = bearer(false, BearerProperties::default());
        bearer.disconnect().await.unwrap();
        assert_eq!(ops.hangups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connect_returns_to_disconnected() {
        let (bearer, _ops) = bearer(true, BearerProperties::default());

        let err = bearer.connect().await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert_eq!(bearer.status(), BearerStatus::Disconnected);
        assert_eq!(bearer.stats().failed_attempts, 1);
        assert!(bearer.last_error().unwrap().contains("no service"));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_while_connecting_is_in_progress() {
        let (bearer, _ops) = bearer(false, BearerProperties::default());

        let b = Arc::clone(&bearer);
        let first = tokio::spawn(async move { b.connect().await });
        tokio::time::sleep(Duration::from_secs(1)).await;

        let err = bearer.connect().await.unwrap_err();
        assert!(matches!(err, Error::InProgress(_)));
        first.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_connect_cancels_and_tears_down() {
        let (bearer, ops) = bearer(false, BearerProperties::default());
        let mut status_rx = bearer.watch_status();

        let b = Arc::clone(&bearer);
        let connect = tokio::spawn(async move { b.connect().await });
        status_rx
            .wait_for(|s| *s == BearerStatus::Connecting)
            .await
            .unwrap();

        bearer.disconnect().await.unwrap();
        let result = connect.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(bearer.status(), BearerStatus::Disconnected);
        // The dial finished after cancellation, so it was hung up.
        assert_eq!(ops.hangups.load(Ordering::SeqCst), 1);
        assert_eq!(bearer.stats().failed_attempts, 1);
    }

    #[tokio::test]
    async fn roaming_refused_unless_allowed() {
        let (bearer, _ops) = bearer(false, BearerProperties::default());
        bearer.store.set_lifecycle(ModemState::Enabled);
        bearer
            .store
            .set_registration_3gpp(RegistrationDomain::Ps, RegistrationState3gpp::Roaming);

        let err = bearer.connect().await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        assert_eq!(bearer.stats().attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn connected_bearer_drives_modem_state() {
        let (bearer, _ops) = bearer(false, BearerProperties::default());
        bearer.store.set_lifecycle(ModemState::Enabled);

        bearer.connect().await.unwrap();
        assert_eq!(bearer.store.snapshot().state, ModemState::Connected);
        bearer.disconnect().await.unwrap();
        assert_eq!(bearer.store.snapshot().state, ModemState::Enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn status_events_published() {
        let (bearer, _ops) = bearer(false, BearerProperties::default());
        let mut events = bearer.store.subscribe();

        bearer.connect().await.unwrap();
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ModemEvent::BearerStatusChanged { status, .. } = event {
                seen.push(status);
            }
        }
        assert_eq!(seen, vec![BearerStatus::Connecting, BearerStatus::Connected]);
    }
}
