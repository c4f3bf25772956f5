//! Motor proxy with push-driven state synchronization.
//!
//! A [`MotorProxy`] mirrors one remote actuator. The server owns the
//! truth; the proxy keeps a cached (state, position) pair current from
//! push notifications and answers reads from that cache without a remote
//! round-trip. Motion commands are fire-and-forget writes; callers that
//! need synchronous semantics block on [`MotorProxy::wait_end_of_move`],
//! which polls the cache until the actuator leaves `Moving`.
//!
//! The cache has a single writer role (the push handlers) and many
//! readers. Updates and event emission happen in the order the handlers
//! process the pushes; subscribers never see a state event reordered
//! against the update that caused it.

use crate::error::{MotionError, MotionResult};
use crate::exporter::{Channel, Command, ExporterBinding, ExporterValue};
use crate::motor::state::{parse_state_table, MotorState};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time;

/// Poll granularity of the motion-completion wait.
pub const POLL_PERIOD: Duration = Duration::from_millis(100);

/// Smallest position change considered meaningful, in actuator units.
pub const DEFAULT_RESOLUTION: f64 = 1e-3;

/// Bounds substituted when the device cannot report usable limits.
/// Downstream UI code always receives a finite pair.
pub const LIMITS_FALLBACK: (f64, f64) = (-1.0e4, 1.0e4);

const EVENT_CAPACITY: usize = 64;

/// Notification emitted by a [`MotorProxy`] to its subscribers.
#[derive(Clone, Debug, PartialEq)]
pub enum MotorEvent {
    /// The cached state took a new value. Emitted once per distinct
    /// transition, never for repeated identical pushes.
    StateChanged(MotorState),
    /// A position push arrived. Every push is forwarded, including
    /// repeats of the same value.
    ValueChanged(f64),
    /// Reply to an on-demand limits query, see
    /// [`MotorProxy::publish_limits`].
    LimitsChanged {
        /// Lower bound.
        low: f64,
        /// Upper bound.
        high: f64,
    },
}

/// Cached (state, position) pair with its update-and-notify operations.
///
/// Shared between the proxy and its push-handler tasks. Reads go through
/// the watch senders' `borrow` and never block.
struct MotorCell {
    name: String,
    state: watch::Sender<MotorState>,
    position: watch::Sender<Option<f64>>,
    events: broadcast::Sender<MotorEvent>,
}

impl MotorCell {
    fn new(name: String) -> Self {
        let (state, _) = watch::channel(MotorState::NotInitialized);
        let (position, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            name,
            state,
            position,
            events,
        }
    }

    /// Apply a decoded state, notifying subscribers on a distinct
    /// transition only.
    fn update_state(&self, new_state: MotorState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == new_state {
                false
            } else {
                *current = new_state;
                true
            }
        });
        if changed {
            debug!("motor '{}': state changed to {}", self.name, new_state);
            let _ = self.events.send(MotorEvent::StateChanged(new_state));
        }
    }

    /// Decode and apply a single state token. A token outside the state
    /// vocabulary is fatal to this update but not to the proxy.
    fn apply_state_token(&self, token: &str) {
        match MotorState::from_token(token) {
            Ok(state) => self.update_state(state),
            Err(err) => error!("motor '{}': {}", self.name, err),
        }
    }

    /// Apply an aggregate `name=TOKEN` payload. An absent own entry
    /// leaves the cache unchanged; other actuators push too.
    fn apply_state_table(&self, payload: &[String]) {
        let table = parse_state_table(payload);
        if let Some(token) = table.get(&self.name) {
            self.apply_state_token(token);
        }
    }

    /// Apply a position push. Forwarded unconditionally, with no
    /// resolution filtering.
    fn update_position(&self, value: f64) {
        self.position.send_replace(Some(value));
        let _ = self.events.send(MotorEvent::ValueChanged(value));
    }
}

/// Client-side proxy for one remote motorized actuator.
///
/// Constructed from configuration with its remote name only; becomes
/// operational once [`initialize`](MotorProxy::initialize) binds the
/// exporter channels. When the position attribute is not exported the
/// proxy stays in a degraded, state-less mode: reads report no position,
/// commands report the feature as unavailable, and nothing is raised.
pub struct MotorProxy {
    resolution: f64,
    cell: Arc<MotorCell>,
    position_attr: Option<Arc<dyn Channel>>,
    abort_cmd: Option<Arc<dyn Command>>,
    limits_cmd: Option<Arc<dyn Command>>,
    dynamic_limits_cmd: Option<Arc<dyn Command>>,
    home_cmd: Option<Arc<dyn Command>>,
    tasks: Vec<JoinHandle<()>>,
}

impl MotorProxy {
    /// Create a proxy for the actuator with the given remote name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            resolution: DEFAULT_RESOLUTION,
            cell: Arc::new(MotorCell::new(name.into())),
            position_attr: None,
            abort_cmd: None,
            limits_cmd: None,
            dynamic_limits_cmd: None,
            home_cmd: None,
            tasks: Vec::new(),
        }
    }

    /// Override the position resolution.
    pub fn with_resolution(mut self, resolution: f64) -> Self {
        self.resolution = resolution;
        self
    }

    /// Remote actuator name.
    pub fn name(&self) -> &str {
        &self.cell.name
    }

    /// Minimum meaningful position delta.
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Bind the proxy to the device through the given exporter binding.
    ///
    /// Binds `<name>Position` and, if that succeeds, the `MotorStates`
    /// aggregate channel, the `<name>State` channel and the four motion
    /// commands, then spawns the subscription tasks that feed the push
    /// handlers. A missing position attribute leaves the proxy
    /// permanently degraded; that is logged, not raised.
    pub async fn initialize(&mut self, binding: &dyn ExporterBinding) {
        self.cell.state.send_replace(MotorState::Unknown);

        let position_name = format!("{}Position", self.name());
        let position_attr = match binding.bind_channel(&position_name).await {
            Ok(Some(channel)) => channel,
            Ok(None) => {
                warn!(
                    "motor '{}': attribute '{}' not exported, proxy disabled",
                    self.name(),
                    position_name
                );
                return;
            }
            Err(err) => {
                warn!(
                    "motor '{}': failed to bind '{}': {:#}",
                    self.name(),
                    position_name,
                    err
                );
                return;
            }
        };
        self.spawn_position_task(position_attr.subscribe());
        self.position_attr = Some(position_attr);

        let state_name = format!("{}State", self.name());
        if let Some(channel) = self.bind_optional_channel(binding, &state_name).await {
            self.spawn_state_task(channel.subscribe());
        }
        if let Some(channel) = self.bind_optional_channel(binding, "MotorStates").await {
            self.spawn_state_table_task(channel.subscribe());
        }

        self.abort_cmd = self.bind_optional_command(binding, "abort").await;
        self.limits_cmd = self.bind_optional_command(binding, "getMotorLimits").await;
        self.dynamic_limits_cmd = self
            .bind_optional_command(binding, "getMotorDynamicLimits")
            .await;
        self.home_cmd = self
            .bind_optional_command(binding, "startHomingMotor")
            .await;

        info!("motor '{}' initialized", self.name());
    }

    async fn bind_optional_channel(
        &self,
        binding: &dyn ExporterBinding,
        name: &str,
    ) -> Option<Arc<dyn Channel>> {
        match binding.bind_channel(name).await {
            Ok(Some(channel)) => Some(channel),
            Ok(None) => {
                debug!("motor '{}': attribute '{}' not exported", self.name(), name);
                None
            }
            Err(err) => {
                warn!(
                    "motor '{}': failed to bind '{}': {:#}",
                    self.name(),
                    name,
                    err
                );
                None
            }
        }
    }

    async fn bind_optional_command(
        &self,
        binding: &dyn ExporterBinding,
        name: &str,
    ) -> Option<Arc<dyn Command>> {
        match binding.bind_command(name).await {
            Ok(command) => Some(command),
            Err(err) => {
                warn!(
                    "motor '{}': command '{}' unavailable: {:#}",
                    self.name(),
                    name,
                    err
                );
                None
            }
        }
    }

    fn spawn_position_task(&mut self, mut rx: broadcast::Receiver<ExporterValue>) {
        let cell = self.cell.clone();
        self.tasks.push(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(value) => match value.as_f64() {
                        Some(position) => cell.update_position(position),
                        None => error!(
                            "motor '{}': non-numeric position push: {:?}",
                            cell.name, value
                        ),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("motor '{}': dropped {} position pushes", cell.name, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }

    fn spawn_state_task(&mut self, mut rx: broadcast::Receiver<ExporterValue>) {
        let cell = self.cell.clone();
        self.tasks.push(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ExporterValue::Str(token)) => cell.apply_state_token(&token),
                    Ok(value) => error!(
                        "motor '{}': unexpected state push: {:?}",
                        cell.name, value
                    ),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("motor '{}': dropped {} state pushes", cell.name, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }

    fn spawn_state_table_task(&mut self, mut rx: broadcast::Receiver<ExporterValue>) {
        let cell = self.cell.clone();
        self.tasks.push(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ExporterValue::StrList(payload)) => cell.apply_state_table(&payload),
                    Ok(value) => error!(
                        "motor '{}': unexpected motor-states push: {:?}",
                        cell.name, value
                    ),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            "motor '{}': dropped {} motor-states pushes",
                            cell.name, skipped
                        );
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }

    /// Feed a position update, as delivered by the `<name>Position`
    /// channel. Public so embedders with their own transport loop can
    /// drive the proxy directly.
    pub fn update_value(&self, position: f64) {
        self.cell.update_position(position);
    }

    /// Feed an aggregate state payload, as delivered by the
    /// `MotorStates` channel.
    pub fn update_motor_states(&self, payload: &[String]) {
        self.cell.apply_state_table(payload);
    }

    /// Cached actuator state. Never blocks, never fails.
    pub fn state(&self) -> MotorState {
        *self.cell.state.borrow()
    }

    /// Last pushed position. Errs until the first update ever arrives.
    pub fn position(&self) -> MotionResult<f64> {
        (*self.cell.position.borrow())
            .ok_or_else(|| MotionError::NoPosition(self.name().to_string()))
    }

    /// Subscribe to this proxy's notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<MotorEvent> {
        self.cell.events.subscribe()
    }

    /// Static motion limits, `(low, high)`.
    pub async fn limits(&self) -> (f64, f64) {
        self.query_limits(&self.limits_cmd).await
    }

    /// Limits under the current device configuration, `(low, high)`.
    pub async fn dynamic_limits(&self) -> (f64, f64) {
        self.query_limits(&self.dynamic_limits_cmd).await
    }

    async fn query_limits(&self, cmd: &Option<Arc<dyn Command>>) -> (f64, f64) {
        let Some(cmd) = cmd else {
            return LIMITS_FALLBACK;
        };
        let reply = match cmd.invoke(&[ExporterValue::Str(self.name().to_string())]).await {
            Ok(reply) => reply,
            Err(err) => {
                debug!("motor '{}': limits query failed: {:#}", self.name(), err);
                return LIMITS_FALLBACK;
            }
        };
        parse_limit_pair(&reply).unwrap_or(LIMITS_FALLBACK)
    }

    /// Query the limits and notify subscribers with the result. For
    /// subscribers that connect after initialization and need bounds
    /// without issuing their own query.
    pub async fn publish_limits(&self) {
        let (low, high) = self.limits().await;
        let _ = self.cell.events.send(MotorEvent::LimitsChanged { low, high });
    }

    /// Start a motion towards `target`. Fire-and-forget: the write
    /// returns once the server accepts it; completion is observed through
    /// state pushes.
    pub async fn move_to(&self, target: f64) -> MotionResult<()> {
        let attr = self
            .position_attr
            .as_ref()
            .ok_or_else(|| MotionError::Unavailable {
                motor: self.name().to_string(),
                feature: "position attribute",
            })?;
        debug!("motor '{}': moving to {}", self.name(), target);
        attr.write(ExporterValue::Float(target)).await?;
        Ok(())
    }

    /// Start a motion and block until it completes or `timeout` elapses.
    pub async fn move_and_wait(&self, target: f64, timeout: Option<Duration>) -> MotionResult<()> {
        self.move_to(target).await?;
        self.wait_end_of_move(timeout).await
    }

    /// Block until the cached state is anything other than `Moving`.
    ///
    /// Polls the cache every [`POLL_PERIOD`]; one poll period elapses
    /// before the first check even when motion is already complete, so
    /// state pushes racing the call get a chance to settle. A timeout
    /// cancels only this local wait; the remote motion keeps running and
    /// the cache keeps updating, so a later wait can still observe
    /// completion.
    pub async fn wait_end_of_move(&self, timeout: Option<Duration>) -> MotionResult<()> {
        let poll = async {
            time::sleep(POLL_PERIOD).await;
            while self.state() == MotorState::Moving {
                time::sleep(POLL_PERIOD).await;
            }
        };
        match timeout {
            Some(limit) => {
                time::timeout(limit, poll)
                    .await
                    .map_err(|_| MotionError::MotionTimeout {
                        motor: self.name().to_string(),
                        timeout: limit,
                    })?;
                Ok(())
            }
            None => {
                poll.await;
                Ok(())
            }
        }
    }

    /// Abort the current motion. A no-op while the actuator reports
    /// `NotInitialized` or when the abort command is not exported.
    pub async fn stop(&self) -> MotionResult<()> {
        if self.state() == MotorState::NotInitialized {
            return Ok(());
        }
        let Some(cmd) = &self.abort_cmd else {
            return Ok(());
        };
        cmd.invoke(&[]).await?;
        info!("motor '{}': abort issued", self.name());
        Ok(())
    }

    /// Start the homing sequence and block until it completes or
    /// `timeout` elapses.
    pub async fn home(&self, timeout: Option<Duration>) -> MotionResult<()> {
        let cmd = self
            .home_cmd
            .as_ref()
            .ok_or_else(|| MotionError::Unavailable {
                motor: self.name().to_string(),
                feature: "homing command",
            })?;
        cmd.invoke(&[ExporterValue::Str(self.name().to_string())])
            .await?;
        info!("motor '{}': homing", self.name());
        self.wait_end_of_move(timeout).await
    }
}

impl Drop for MotorProxy {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Parse a limits reply into a finite `(low, high)` pair.
///
/// The device reports an unset bound as an "infinite" sentinel; a pair
/// containing one is as useless to callers as a failed query.
fn parse_limit_pair(reply: &ExporterValue) -> Option<(f64, f64)> {
    let entries = reply.as_str_list()?;
    if entries.len() != 2 {
        return None;
    }
    let low: f64 = entries[0].trim().parse().ok()?;
    let high: f64 = entries[1].trim().parse().ok()?;
    if low.is_infinite() || high.is_infinite() {
        return None;
    }
    Some((low, high))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn test_parse_limit_pair() {
        let reply = ExporterValue::StrList(vec!["-180.0".into(), "180.0".into()]);
        assert_eq!(parse_limit_pair(&reply), Some((-180.0, 180.0)));

        // "1e999" overflows to infinity, the device's "no limit" sentinel
        let sentinel = ExporterValue::StrList(vec!["0.0".into(), "1e999".into()]);
        assert_eq!(parse_limit_pair(&sentinel), None);

        let short = ExporterValue::StrList(vec!["0.0".into()]);
        assert_eq!(parse_limit_pair(&short), None);

        let garbage = ExporterValue::StrList(vec!["low".into(), "high".into()]);
        assert_eq!(parse_limit_pair(&garbage), None);

        assert_eq!(parse_limit_pair(&ExporterValue::Null), None);
    }

    #[tokio::test]
    async fn test_position_is_an_error_until_first_push() {
        let motor = MotorProxy::new("Omega");
        assert!(matches!(
            motor.position(),
            Err(MotionError::NoPosition(name)) if name == "Omega"
        ));

        motor.update_value(12.5);
        assert_eq!(motor.position().unwrap(), 12.5);
    }

    #[tokio::test]
    async fn test_every_position_push_is_forwarded() {
        let motor = MotorProxy::new("Omega");
        let mut rx = motor.subscribe();

        motor.update_value(1.0);
        motor.update_value(1.0);
        motor.update_value(1.0005);

        assert_eq!(rx.try_recv().unwrap(), MotorEvent::ValueChanged(1.0));
        assert_eq!(rx.try_recv().unwrap(), MotorEvent::ValueChanged(1.0));
        assert_eq!(rx.try_recv().unwrap(), MotorEvent::ValueChanged(1.0005));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_state_transitions_notify_once() {
        let motor = MotorProxy::new("Omega");
        let mut rx = motor.subscribe();

        let moving = vec!["Omega=Moving".to_string(), "Kappa=Ready".to_string()];
        motor.update_motor_states(&moving);
        motor.update_motor_states(&moving);
        motor.update_motor_states(&["Omega=Ready".to_string()]);

        assert_eq!(
            rx.try_recv().unwrap(),
            MotorEvent::StateChanged(MotorState::Moving)
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            MotorEvent::StateChanged(MotorState::Ready)
        );
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(motor.state(), MotorState::Ready);
    }

    #[tokio::test]
    async fn test_absent_entry_leaves_state_unchanged() {
        let motor = MotorProxy::new("Omega");
        motor.update_motor_states(&["Omega=Moving".to_string()]);

        motor.update_motor_states(&["Kappa=Ready".to_string()]);
        assert_eq!(motor.state(), MotorState::Moving);
    }

    #[tokio::test]
    async fn test_decode_failure_does_not_poison_the_proxy() {
        let motor = MotorProxy::new("Omega");
        let mut rx = motor.subscribe();

        motor.update_motor_states(&["Omega=SPINNING".to_string()]);
        assert_eq!(motor.state(), MotorState::NotInitialized);

        motor.update_motor_states(&["Omega=Ready".to_string()]);
        assert_eq!(motor.state(), MotorState::Ready);
        assert_eq!(
            rx.try_recv().unwrap(),
            MotorEvent::StateChanged(MotorState::Ready)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_settles_for_one_tick_even_when_idle() {
        let motor = MotorProxy::new("Omega");
        motor.update_motor_states(&["Omega=Ready".to_string()]);

        let before = time::Instant::now();
        motor.wait_end_of_move(None).await.unwrap();
        assert_eq!(before.elapsed(), POLL_PERIOD);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_while_moving() {
        let motor = MotorProxy::new("Omega");
        motor.update_motor_states(&["Omega=Moving".to_string()]);

        let before = time::Instant::now();
        let err = motor
            .wait_end_of_move(Some(Duration::from_millis(350)))
            .await
            .unwrap_err();
        assert!(matches!(err, MotionError::MotionTimeout { .. }));
        assert_eq!(before.elapsed(), Duration::from_millis(350));

        // the cache machinery is still live after a cancelled wait
        motor.update_motor_states(&["Omega=Ready".to_string()]);
        motor
            .wait_end_of_move(Some(Duration::from_millis(350)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_degraded_proxy_reports_commands_unavailable() {
        let motor = MotorProxy::new("Omega");
        assert!(matches!(
            motor.move_to(1.0).await,
            Err(MotionError::Unavailable { .. })
        ));
        assert!(matches!(
            motor.home(None).await,
            Err(MotionError::Unavailable { .. })
        ));
        assert_eq!(motor.limits().await, LIMITS_FALLBACK);
    }
}
