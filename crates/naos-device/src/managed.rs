use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use naos_endpoint::relay::{self, RelayDevice, SessionSource};
use naos_endpoint::{
    metrics, params, EndpointError, MetricInfo, ParamInfo, ParamType, ParamUpdate,
};
use naos_frame::endpoint::APPLICATION;
use naos_session::{Session, SessionError, SessionStatus};
use naos_transport::{Channel, Device, TransportError};
use tokio::sync::{broadcast, watch, Mutex, MutexGuard};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::error::{ManagedError, Result};
use crate::event::{Capabilities, DeviceEvent};

/// Orchestrates the lifecycle of one device.
///
/// An active managed device holds an open channel and lazily opens one
/// shared session for its own requests, a periodic ping and the parameter
/// change poller. The shared session and all cached state live behind a
/// single lock, so foreground calls and background work never interleave
/// their exchanges.
///
/// Cloning is cheap; clones refer to the same device.
#[derive(Clone)]
pub struct ManagedDevice {
    inner: Arc<Inner>,
}

struct Inner {
    device: Arc<dyn Device>,
    config: DeviceConfig,
    state: Mutex<State>,
    events: broadcast::Sender<DeviceEvent>,
}

#[derive(Default)]
struct State {
    channel: Option<Arc<dyn Channel>>,
    session: Option<Session>,
    background: Option<CancellationToken>,
    locked: bool,
    protected: bool,
    password: Option<String>,
    capabilities: Capabilities,
    params: Vec<ParamInfo>,
    values: HashMap<u8, Bytes>,
    watermark: u64,
    relays: Vec<u8>,
    metrics: Vec<MetricInfo>,
    mtu: Option<u16>,
}

impl ManagedDevice {
    /// Manage a device with the given settings.
    pub fn new(device: Arc<dyn Device>, config: DeviceConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                device,
                config,
                state: Mutex::new(State::default()),
                events,
            }),
        }
    }

    /// Identifier of the managed device.
    pub fn id(&self) -> String {
        self.inner.device.id()
    }

    /// The managed device settings.
    pub fn config(&self) -> &DeviceConfig {
        &self.inner.config
    }

    /// Subscribe to device events.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.inner.events.subscribe()
    }

    /// Whether the device has an open channel.
    pub async fn is_active(&self) -> bool {
        self.lock().await.channel.is_some()
    }

    /// Open the channel and start the background pinger and poller.
    pub async fn activate(&self) -> Result<()> {
        let mut state = self.lock().await;
        if state.channel.is_some() {
            return Ok(());
        }

        let timeout = self.inner.config.open_timeout;
        let channel = tokio::time::timeout(timeout, self.inner.device.open())
            .await
            .map_err(|_| ManagedError::OpenTimeout(timeout))??;

        let token = CancellationToken::new();
        tokio::spawn(background(
            Arc::downgrade(&self.inner),
            token.clone(),
            channel.watch_closed(),
        ));

        state.channel = Some(channel);
        state.background = Some(token);
        drop(state);

        info!(device = %self.id(), "device activated");
        self.emit(DeviceEvent::Activated);
        Ok(())
    }

    /// End the shared session and close the channel.
    pub async fn deactivate(&self) {
        let mut state = self.lock().await;
        let session = state.session.take();
        let Some(channel) = self.teardown(&mut state) else {
            return;
        };
        drop(state);

        if let Some(session) = session {
            if let Err(err) = session.end(self.inner.config.end_timeout).await {
                debug!(%err, "failed to end shared session");
            }
        }
        channel.close().await;

        info!(device = %self.id(), "device deactivated");
        self.emit(DeviceEvent::Disconnected);
    }

    /// Query the lock state of the device.
    pub async fn locked(&self) -> Result<bool> {
        let timeout = self.inner.config.request_timeout;
        let mut state = self.lock().await;
        let status = self
            .exchange(&mut state, |s| {
                Box::pin(async move { s.status(timeout).await.map_err(EndpointError::from) })
            })
            .await?;
        self.set_locked(&mut state, status.locked());
        Ok(status.locked())
    }

    /// The last known lock state, without asking the device.
    pub async fn is_locked(&self) -> bool {
        self.lock().await.locked
    }

    /// Whether the device has ever been observed locked.
    pub async fn is_protected(&self) -> bool {
        self.lock().await.protected
    }

    /// Unlock the device.
    ///
    /// An accepted password is remembered and used to unlock every session
    /// opened later.
    pub async fn unlock(&self, password: &str) -> Result<bool> {
        let timeout = self.inner.config.request_timeout;
        let mut state = self.lock().await;
        let pass = password.to_string();
        let ok = self
            .exchange(&mut state, |s| {
                Box::pin(async move { s.unlock(&pass, timeout).await.map_err(EndpointError::from) })
            })
            .await?;
        if ok {
            state.password = Some(password.to_string());
            self.set_locked(&mut state, false);
        }
        Ok(ok)
    }

    /// Reload capabilities, parameters, values, relays, metrics and MTU.
    pub async fn refresh(&self) -> Result<()> {
        let timeout = self.inner.config.request_timeout;
        let mut state = self.lock().await;

        let (status, capabilities) = self
            .exchange(&mut state, |s| Box::pin(probe(s, timeout)))
            .await?;
        self.set_locked(&mut state, status.locked());
        state.capabilities = capabilities;

        if capabilities.params {
            let (infos, updates) = self
                .exchange(&mut state, |s| Box::pin(load_params(s, timeout)))
                .await?;
            state.watermark = params::watermark(&updates, 0);
            state.values = updates.into_iter().map(|u| (u.reference, u.value)).collect();
            state.params = infos;
        } else {
            state.params.clear();
            state.values.clear();
            state.watermark = 0;
        }

        state.relays = if capabilities.relay {
            let map = self
                .exchange(&mut state, |s| Box::pin(relay::scan(s, timeout)))
                .await?;
            relay::indices(map)
        } else {
            Vec::new()
        };

        state.metrics = if capabilities.metrics {
            self.exchange(&mut state, |s| Box::pin(metrics::list(s, timeout)))
                .await?
        } else {
            Vec::new()
        };

        state.mtu = self
            .exchange(&mut state, |s| Box::pin(mtu(s, timeout)))
            .await?;
        drop(state);

        debug!(device = %self.id(), "device refreshed");
        self.emit(DeviceEvent::Refreshed);
        Ok(())
    }

    /// Collect parameter changes since the last watermark.
    ///
    /// Emits one [`DeviceEvent::ParamUpdated`] per changed parameter and
    /// returns their number. Does nothing before the first refresh.
    pub async fn poll(&self) -> Result<usize> {
        let timeout = self.inner.config.request_timeout;
        let mut state = self.lock().await;
        if !state.capabilities.params || state.params.is_empty() {
            return Ok(0);
        }

        let since = state.watermark;
        let updates = self
            .exchange(&mut state, |s| {
                Box::pin(params::collect(s, None, since, timeout))
            })
            .await?;

        state.watermark = params::watermark(&updates, since);
        let mut changed = Vec::with_capacity(updates.len());
        for update in updates {
            if let Some(name) = name_of(&state.params, update.reference) {
                changed.push((update.reference, name));
            }
            state.values.insert(update.reference, update.value);
        }
        drop(state);

        let count = changed.len();
        for (reference, name) in changed {
            self.emit(DeviceEvent::ParamUpdated { reference, name });
        }
        Ok(count)
    }

    /// Run `f` on the shared session.
    ///
    /// The session is opened on first use. Any error returned by `f` discards
    /// the session; the next call opens a fresh one.
    pub async fn use_session<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a mut Session) -> BoxFuture<'a, naos_endpoint::Result<T>>,
    {
        let mut state = self.lock().await;
        self.exchange(&mut state, f).await
    }

    /// Open a dedicated session, unlocking it with the remembered password.
    pub async fn new_session(&self) -> Result<Session> {
        let (channel, password) = {
            let state = self.lock().await;
            let channel = state.channel.clone().ok_or(ManagedError::Inactive)?;
            (channel, state.password.clone())
        };
        Ok(self.open_session(channel, password.as_deref()).await?)
    }

    /// Cached parameter list.
    pub async fn parameters(&self) -> Vec<ParamInfo> {
        self.lock().await.params.clone()
    }

    /// Cached value of a parameter.
    pub async fn value(&self, name: &str) -> Option<Bytes> {
        let state = self.lock().await;
        let info = state.params.iter().find(|p| p.name == name)?;
        state.values.get(&info.reference).cloned()
    }

    /// Read a parameter from the device and update the cache.
    pub async fn read_param(&self, name: &str) -> Result<Bytes> {
        let timeout = self.inner.config.request_timeout;
        let mut state = self.lock().await;
        let reference = ref_of(&state.params, name)?;
        let value = self
            .exchange(&mut state, |s| Box::pin(params::read(s, reference, timeout)))
            .await?;
        state.values.insert(reference, value.clone());
        Ok(value)
    }

    /// Write a parameter and update the cache.
    pub async fn write_param(&self, name: &str, value: &[u8]) -> Result<()> {
        let timeout = self.inner.config.request_timeout;
        let mut state = self.lock().await;
        let reference = ref_of(&state.params, name)?;
        let data = value.to_vec();
        self.exchange(&mut state, |s| {
            Box::pin(async move { params::write(s, reference, &data, timeout).await })
        })
        .await?;
        state
            .values
            .insert(reference, Bytes::copy_from_slice(value));
        Ok(())
    }

    /// Clear a parameter and drop its cached value.
    pub async fn clear_param(&self, name: &str) -> Result<()> {
        let timeout = self.inner.config.request_timeout;
        let mut state = self.lock().await;
        let reference = ref_of(&state.params, name)?;
        self.exchange(&mut state, |s| Box::pin(params::clear(s, reference, timeout)))
            .await?;
        state.values.remove(&reference);
        Ok(())
    }

    /// Capabilities found by the last refresh.
    pub async fn capabilities(&self) -> Capabilities {
        self.lock().await.capabilities
    }

    /// Metrics found by the last refresh.
    pub async fn metrics(&self) -> Vec<MetricInfo> {
        self.lock().await.metrics.clone()
    }

    /// MTU found by the last refresh.
    pub async fn mtu(&self) -> Option<u16> {
        self.lock().await.mtu
    }

    /// Downstream devices found by the last refresh.
    ///
    /// Their tunnels run on dedicated, auto-unlocked sessions of this device.
    pub async fn relay_devices(&self) -> Vec<RelayDevice> {
        let indices = self.lock().await.relays.clone();
        let host: Arc<dyn SessionSource> = Arc::new(self.clone());
        indices
            .into_iter()
            .map(|index| RelayDevice::new(Arc::clone(&host), index))
            .collect()
    }

    async fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().await
    }

    fn emit(&self, event: DeviceEvent) {
        let _ = self.inner.events.send(event);
    }

    fn set_locked(&self, state: &mut State, locked: bool) {
        if locked {
            state.protected = true;
        }
        if state.locked != locked {
            state.locked = locked;
            self.emit(DeviceEvent::LockChanged { locked });
        }
    }

    /// Run one exchange on the shared session, discarding it on failure.
    async fn exchange<T, F>(&self, state: &mut State, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a mut Session) -> BoxFuture<'a, naos_endpoint::Result<T>>,
    {
        if state.session.is_none() {
            let channel = state.channel.clone().ok_or(ManagedError::Inactive)?;
            let session = self
                .open_session(channel, state.password.as_deref())
                .await?;
            state.session = Some(session);
        }
        let session = state.session.as_mut().ok_or(ManagedError::Inactive)?;

        match f(session).await {
            Ok(value) => Ok(value),
            Err(err) => {
                if let Some(session) = state.session.take() {
                    warn!(%err, session = session.id(), "discarding shared session");
                    let _ = session.end(Duration::ZERO).await;
                }
                Err(err.into())
            }
        }
    }

    async fn open_session(
        &self,
        channel: Arc<dyn Channel>,
        password: Option<&str>,
    ) -> naos_session::Result<Session> {
        let config = &self.inner.config;
        let mut session = Session::open(channel, config.open_timeout).await?;

        if let Some(password) = password {
            if session.status(config.request_timeout).await?.locked()
                && !session.unlock(password, config.request_timeout).await?
            {
                let _ = session.end(Duration::ZERO).await;
                return Err(naos_session::DeviceError::SessionLocked.into());
            }
        }

        Ok(session)
    }

    /// Detach the channel and stop background work. Returns the channel if
    /// the device was active.
    fn teardown(&self, state: &mut State) -> Option<Arc<dyn Channel>> {
        let channel = state.channel.take()?;
        if let Some(token) = state.background.take() {
            token.cancel();
        }
        if state.protected {
            self.set_locked(state, true);
        }
        Some(channel)
    }

    async fn disconnected(&self) {
        let mut state = self.lock().await;
        state.session = None;
        let Some(channel) = self.teardown(&mut state) else {
            return;
        };
        drop(state);

        channel.close().await;
        warn!(device = %self.id(), "device disconnected");
        self.emit(DeviceEvent::Disconnected);
    }
}

impl fmt::Debug for ManagedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedDevice")
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionSource for ManagedDevice {
    fn id(&self) -> String {
        ManagedDevice::id(self)
    }

    async fn new_session(&self) -> naos_session::Result<Session> {
        match ManagedDevice::new_session(self).await {
            Ok(session) => Ok(session),
            Err(ManagedError::Endpoint(EndpointError::Session(err))) => Err(err),
            Err(_) => Err(TransportError::Closed.into()),
        }
    }
}

async fn probe(
    session: &mut Session,
    timeout: Duration,
) -> naos_endpoint::Result<(SessionStatus, Capabilities)> {
    let status = session.status(timeout).await?;
    let mut capabilities = Capabilities::default();
    for endpoint in APPLICATION {
        capabilities.set(endpoint, session.query(endpoint, timeout).await?);
    }
    Ok((status, capabilities))
}

/// List parameters and collect the values of all but actions.
async fn load_params(
    session: &mut Session,
    timeout: Duration,
) -> naos_endpoint::Result<(Vec<ParamInfo>, Vec<ParamUpdate>)> {
    let infos = params::list(session, timeout).await?;
    let refs: Vec<u8> = infos
        .iter()
        .filter(|p| p.kind != ParamType::Action && p.reference < 64)
        .map(|p| p.reference)
        .collect();
    let updates = params::collect(session, Some(&refs), 0, timeout).await?;
    Ok((infos, updates))
}

async fn mtu(session: &mut Session, timeout: Duration) -> naos_endpoint::Result<Option<u16>> {
    match session.get_mtu(timeout).await {
        Ok(mtu) => Ok(Some(mtu)),
        Err(SessionError::Device(_)) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn ref_of(params: &[ParamInfo], name: &str) -> Result<u8> {
    params
        .iter()
        .find(|p| p.name == name)
        .map(|p| p.reference)
        .ok_or_else(|| ManagedError::UnknownParameter(name.to_string()))
}

fn name_of(params: &[ParamInfo], reference: u8) -> Option<String> {
    params
        .iter()
        .find(|p| p.reference == reference)
        .map(|p| p.name.clone())
}

/// Ping and poll periodically until cancelled, and tear down the device if
/// its channel is lost.
async fn background(
    inner: Weak<Inner>,
    token: CancellationToken,
    mut closed: watch::Receiver<bool>,
) {
    let (ping_interval, poll_interval) = match inner.upgrade() {
        Some(inner) => (inner.config.ping_interval, inner.config.poll_interval),
        None => return,
    };
    let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut poll = tokio::time::interval_at(Instant::now() + poll_interval, poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            changed = closed.changed() => {
                if changed.is_ok() && !*closed.borrow_and_update() {
                    continue;
                }
                if let Some(inner) = inner.upgrade() {
                    ManagedDevice { inner }.disconnected().await;
                }
                break;
            }
            _ = ping.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                let device = ManagedDevice { inner };
                let timeout = device.inner.config.request_timeout;
                if let Err(err) = device
                    .use_session(|s| {
                        Box::pin(async move { s.ping(timeout).await.map_err(EndpointError::from) })
                    })
                    .await
                {
                    warn!(%err, device = %device.id(), "ping failed");
                }
            }
            _ = poll.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                if let Err(err) = (ManagedDevice { inner }).poll().await {
                    warn!(%err, "parameter poll failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use naos_endpoint::params::ParamMode;
    use naos_frame::{ACK, CONTROL};

    use super::*;
    use crate::simulator::Simulator;

    fn config() -> DeviceConfig {
        DeviceConfig {
            open_timeout: Duration::from_millis(500),
            request_timeout: Duration::from_millis(500),
            ping_interval: Duration::from_secs(60),
            poll_interval: Duration::from_secs(60),
            ..DeviceConfig::default()
        }
    }

    async fn session_id(device: &ManagedDevice) -> u16 {
        device
            .use_session(|s| Box::pin(async move { Ok::<_, EndpointError>(s.id()) }))
            .await
            .unwrap()
    }

    async fn next_event(events: &mut broadcast::Receiver<DeviceEvent>) -> DeviceEvent {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn activate_and_refresh() {
        let sim = Simulator::new();
        let device = ManagedDevice::new(sim.device(), config());
        let mut events = device.subscribe();

        device.activate().await.unwrap();
        assert!(device.is_active().await);
        assert_eq!(next_event(&mut events).await, DeviceEvent::Activated);

        device.refresh().await.unwrap();
        assert_eq!(next_event(&mut events).await, DeviceEvent::Refreshed);

        let caps = device.capabilities().await;
        assert!(caps.params && caps.relay && caps.metrics);
        assert!(!caps.fs && !caps.update);

        let params = device.parameters().await;
        assert_eq!(params.len(), 3);
        assert!(params[0].mode.contains(ParamMode::APPLICATION));
        assert_eq!(device.value("name").await.unwrap().as_ref(), b"naos");
        assert_eq!(device.value("count").await.unwrap().as_ref(), b"1");
        assert!(device.value("reboot").await.is_none());

        assert_eq!(device.mtu().await, Some(256));
        assert_eq!(device.metrics().await.len(), 1);
        let relays = device.relay_devices().await;
        assert_eq!(relays.len(), 1);
        assert_eq!(relays[0].index(), 2);
        assert_eq!(naos_transport::Device::id(&relays[0]), "sim/2");
    }

    #[tokio::test]
    async fn poll_emits_changes_since_watermark() {
        let sim = Simulator::new();
        let device = ManagedDevice::new(sim.device(), config());
        device.activate().await.unwrap();
        device.refresh().await.unwrap();
        let mut events = device.subscribe();

        assert_eq!(device.poll().await.unwrap(), 0);

        sim.set_param("count", b"2");
        assert_eq!(device.poll().await.unwrap(), 1);
        assert_eq!(
            next_event(&mut events).await,
            DeviceEvent::ParamUpdated {
                reference: 1,
                name: "count".into()
            }
        );
        assert_eq!(device.value("count").await.unwrap().as_ref(), b"2");
        assert_eq!(device.poll().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn background_poller_runs() {
        let sim = Simulator::new();
        let device = ManagedDevice::new(
            sim.device(),
            DeviceConfig {
                poll_interval: Duration::from_millis(20),
                ..config()
            },
        );
        device.activate().await.unwrap();
        device.refresh().await.unwrap();
        let mut events = device.subscribe();

        sim.set_param("name", b"renamed");
        loop {
            if let DeviceEvent::ParamUpdated { name, .. } = next_event(&mut events).await {
                assert_eq!(name, "name");
                break;
            }
        }
        assert_eq!(device.value("name").await.unwrap().as_ref(), b"renamed");
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn background_pinger_replaces_failed_session() {
        let sim = Simulator::new();
        let device = ManagedDevice::new(
            sim.device(),
            DeviceConfig {
                ping_interval: Duration::from_millis(20),
                ..config()
            },
        );
        device.activate().await.unwrap();

        eventually(|| sim.last_command(ACK) == Some(Vec::new())).await;
        assert_eq!(sim.sessions_opened(), 1);

        sim.set_ping_ack(4);
        eventually(|| sim.sessions_opened() >= 2).await;
        assert!(sim.sessions_ended() >= 1);

        sim.set_ping_ack(1);
        let before = sim.sessions_opened();
        assert!(session_id(&device).await > 0);
        assert!(sim.sessions_opened() <= before + 1);

        device.deactivate().await;
    }

    #[tokio::test]
    async fn param_writes_update_cache() {
        let sim = Simulator::new();
        let device = ManagedDevice::new(sim.device(), config());
        device.activate().await.unwrap();
        device.refresh().await.unwrap();

        device.write_param("name", b"node").await.unwrap();
        assert_eq!(device.value("name").await.unwrap().as_ref(), b"node");
        assert_eq!(sim.param("name").unwrap(), b"node");
        assert_eq!(device.read_param("count").await.unwrap().as_ref(), b"1");

        device.clear_param("count").await.unwrap();
        assert!(device.value("count").await.is_none());

        assert!(matches!(
            device.read_param("missing").await,
            Err(ManagedError::UnknownParameter(_))
        ));
    }

    #[tokio::test]
    async fn failed_exchange_discards_shared_session() {
        let sim = Simulator::new();
        let device = ManagedDevice::new(sim.device(), config());
        device.activate().await.unwrap();

        let first = session_id(&device).await;
        let again = session_id(&device).await;
        assert_eq!(first, again);

        let timeout = config().request_timeout;
        let err = device
            .use_session(|s| Box::pin(params::read(s, 99, timeout)))
            .await
            .unwrap_err();
        assert_eq!(err.device_error(), Some(naos_session::DeviceError::InvalidData));

        let fresh = session_id(&device).await;
        assert_ne!(fresh, first);
        assert_eq!(sim.sessions_opened(), 2);
    }

    #[tokio::test]
    async fn unlock_is_remembered_for_new_sessions() {
        let sim = Simulator::locked("secret");
        let device = ManagedDevice::new(sim.device(), config());
        device.activate().await.unwrap();
        let mut events = device.subscribe();

        assert!(device.locked().await.unwrap());
        assert_eq!(next_event(&mut events).await, DeviceEvent::LockChanged { locked: true });
        assert!(!device.unlock("wrong").await.unwrap());
        assert!(device.unlock("secret").await.unwrap());
        assert_eq!(next_event(&mut events).await, DeviceEvent::LockChanged { locked: false });

        let mut session = device.new_session().await.unwrap();
        assert_eq!(sim.last_command(CONTROL), Some(vec![1, b's', b'e', b'c', b'r', b'e', b't']));
        let timeout = config().request_timeout;
        assert!(params::list(&mut session, timeout).await.is_ok());
    }

    #[tokio::test]
    async fn locked_sessions_fail() {
        let sim = Simulator::locked("secret");
        let device = ManagedDevice::new(sim.device(), config());
        device.activate().await.unwrap();

        let err = device.refresh().await.unwrap_err();
        assert_eq!(err.device_error(), Some(naos_session::DeviceError::SessionLocked));
        assert!(device.is_protected().await);
    }

    #[tokio::test]
    async fn disconnect_reasserts_lock() {
        let sim = Simulator::locked("secret");
        let device = ManagedDevice::new(sim.device(), config());
        device.activate().await.unwrap();
        device.locked().await.unwrap();
        device.unlock("secret").await.unwrap();
        assert!(!device.is_locked().await);
        let mut events = device.subscribe();

        sim.disconnect();
        assert_eq!(next_event(&mut events).await, DeviceEvent::LockChanged { locked: true });
        assert_eq!(next_event(&mut events).await, DeviceEvent::Disconnected);
        assert!(!device.is_active().await);
        assert!(device.is_locked().await);
        assert!(matches!(device.new_session().await, Err(ManagedError::Inactive)));
    }

    #[tokio::test]
    async fn deactivate_ends_shared_session() {
        let sim = Simulator::new();
        let device = ManagedDevice::new(sim.device(), config());
        device.activate().await.unwrap();
        session_id(&device).await;
        let mut events = device.subscribe();

        device.deactivate().await;
        assert_eq!(next_event(&mut events).await, DeviceEvent::Disconnected);
        assert!(!device.is_active().await);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sim.sessions_ended(), 1);

        device.deactivate().await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn relay_devices_tunnel_through_host() {
        let sim = Simulator::new();
        let device = ManagedDevice::new(sim.device(), config());
        device.activate().await.unwrap();
        device.refresh().await.unwrap();

        let relay = device.relay_devices().await.remove(0);
        let channel = naos_transport::Device::open(&relay).await.unwrap();
        assert_eq!(sim.last_command(naos_frame::RELAY), Some(vec![1, 2]));

        channel.close().await;
        assert!(!channel.valid());
    }
}
