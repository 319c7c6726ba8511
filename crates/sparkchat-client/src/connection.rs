//! Connection lifecycle state machine for the channel being viewed.
//!
//! The machine is pure: every input (open/close, subscription signals,
//! timer fires, network signals) returns a list of [`Effect`]s for the
//! session actor to carry out against the real feed, store, and clock.
//! Timers are invalidated by an epoch counter -- each teardown bumps the
//! epoch, and a timer that fires with a stale epoch is a guaranteed no-op.

use std::time::Duration;

use sparkchat_shared::constants::{
    BACKOFF_BASE_MS, BACKOFF_MAX_MS, HEARTBEAT_INTERVAL_SECS, MAX_RECONNECT_ATTEMPTS,
};
use sparkchat_shared::{ChannelId, ConnectionStatus};

/// Tunables for the reconnect machine.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Keep-alive interval while connected.
    pub heartbeat_interval: Duration,
    /// First reconnect delay; doubles each failed cycle.
    pub backoff_base: Duration,
    /// Upper bound on the reconnect delay.
    pub backoff_cap: Duration,
    /// Failed cycles tolerated before giving up.
    pub max_attempts: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            backoff_base: Duration::from_millis(BACKOFF_BASE_MS),
            backoff_cap: Duration::from_millis(BACKOFF_MAX_MS),
            max_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Failure signals feeding the reconnect path.  All kinds are handled
/// identically; the distinction only matters for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ChannelError,
    TimedOut,
    ClosedByFeed,
    KeepaliveFailed,
    SubscribeFailed,
}

/// Side effects the session actor carries out after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Open a subscription for the channel's topic.
    Subscribe(ChannelId),
    /// Tear down the current subscription, if any.
    Unsubscribe,
    /// Reload the channel's history from the store.
    LoadHistory(ChannelId),
    /// Emit a keep-alive on the current subscription.
    SendKeepalive,
    /// Arm the heartbeat timer; ignore the fire if the epoch went stale.
    ArmHeartbeat { epoch: u64, after: Duration },
    /// Arm the reconnect timer; ignore the fire if the epoch went stale.
    ArmBackoff { epoch: u64, after: Duration },
    /// Surface a status change to the rendering layer.
    Notify(ConnectionStatus),
}

/// Owns the lifecycle of at most one realtime subscription.
pub struct ConnectionManager {
    config: ConnectionConfig,
    status: ConnectionStatus,
    channel: Option<ChannelId>,
    epoch: u64,
    attempt: u32,
    online: bool,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            status: ConnectionStatus::Disconnected,
            channel: None,
            epoch: 0,
            attempt: 0,
            online: true,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn channel(&self) -> Option<ChannelId> {
        self.channel
    }

    /// Current timer generation.  Armed timers carry the epoch they were
    /// created under and are discarded when it no longer matches.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Select a channel for viewing.  Tears down any previous
    /// subscription and starts a fresh connection cycle.
    pub fn open(&mut self, channel: ChannelId) -> Vec<Effect> {
        self.epoch += 1;
        self.attempt = 0;
        self.channel = Some(channel);

        if !self.online {
            self.status = ConnectionStatus::Disconnected;
            return vec![Effect::Unsubscribe, Effect::Notify(self.status)];
        }

        self.status = ConnectionStatus::Connecting;
        vec![
            Effect::Unsubscribe,
            Effect::Subscribe(channel),
            Effect::Notify(self.status),
        ]
    }

    /// Stop viewing.  Safe to call repeatedly and from any state.
    pub fn close(&mut self) -> Vec<Effect> {
        self.epoch += 1;
        self.attempt = 0;
        self.channel = None;

        let was = self.status;
        self.status = ConnectionStatus::Disconnected;

        let mut effects = vec![Effect::Unsubscribe];
        if was != ConnectionStatus::Disconnected {
            effects.push(Effect::Notify(self.status));
        }
        effects
    }

    /// The subscription reported it went live.
    pub fn on_subscribed(&mut self) -> Vec<Effect> {
        let Some(channel) = self.channel else {
            return Vec::new();
        };
        if self.status == ConnectionStatus::Connected {
            return Vec::new();
        }

        self.attempt = 0;
        self.status = ConnectionStatus::Connected;
        vec![
            Effect::Notify(self.status),
            Effect::LoadHistory(channel),
            Effect::ArmHeartbeat {
                epoch: self.epoch,
                after: self.config.heartbeat_interval,
            },
        ]
    }

    /// A failure signal: subscription error, timeout, unexpected close, or
    /// a keep-alive that could not be sent.  All kinds schedule a
    /// reconnect until the attempt budget is spent.
    pub fn on_failure(&mut self, _kind: FailureKind) -> Vec<Effect> {
        if self.channel.is_none() || self.status == ConnectionStatus::Disconnected {
            return Vec::new();
        }

        self.epoch += 1;
        self.attempt += 1;

        let mut effects = vec![Effect::Unsubscribe, Effect::Notify(ConnectionStatus::Errored)];

        if !self.online || self.attempt >= self.config.max_attempts {
            self.status = ConnectionStatus::Disconnected;
            effects.push(Effect::Notify(self.status));
        } else {
            self.status = ConnectionStatus::Reconnecting;
            effects.push(Effect::Notify(self.status));
            effects.push(Effect::ArmBackoff {
                epoch: self.epoch,
                after: self.backoff_delay(self.attempt - 1),
            });
        }
        effects
    }

    /// Heartbeat timer fired.  Stale epochs are a no-op.
    pub fn on_heartbeat_fired(&mut self, epoch: u64) -> Vec<Effect> {
        if epoch != self.epoch || self.status != ConnectionStatus::Connected {
            return Vec::new();
        }
        vec![
            Effect::SendKeepalive,
            Effect::ArmHeartbeat {
                epoch: self.epoch,
                after: self.config.heartbeat_interval,
            },
        ]
    }

    /// Backoff timer fired.  Stale epochs are a no-op; a fresh connecting
    /// attempt starts only while the network is available.
    pub fn on_backoff_fired(&mut self, epoch: u64) -> Vec<Effect> {
        if epoch != self.epoch || self.status != ConnectionStatus::Reconnecting {
            return Vec::new();
        }
        let Some(channel) = self.channel else {
            return Vec::new();
        };

        if !self.online {
            self.status = ConnectionStatus::Disconnected;
            return vec![Effect::Notify(self.status)];
        }

        self.status = ConnectionStatus::Connecting;
        vec![Effect::Subscribe(channel), Effect::Notify(self.status)]
    }

    /// The host environment lost network connectivity.  Timers are
    /// cancelled immediately via the epoch bump.
    pub fn on_network_offline(&mut self) -> Vec<Effect> {
        self.online = false;
        self.epoch += 1;

        if self.channel.is_none() || self.status == ConnectionStatus::Disconnected {
            return Vec::new();
        }

        self.status = ConnectionStatus::Disconnected;
        vec![Effect::Unsubscribe, Effect::Notify(self.status)]
    }

    /// Connectivity came back.  Re-attempts only if a channel is open and
    /// the machine had given up.
    pub fn on_network_online(&mut self) -> Vec<Effect> {
        self.online = true;

        let Some(channel) = self.channel else {
            return Vec::new();
        };
        if self.status != ConnectionStatus::Disconnected {
            return Vec::new();
        }

        self.epoch += 1;
        self.attempt = 0;
        self.status = ConnectionStatus::Connecting;
        vec![Effect::Subscribe(channel), Effect::Notify(self.status)]
    }

    fn backoff_delay(&self, cycle: u32) -> Duration {
        let factor = 2u32.saturating_pow(cycle.min(16));
        self.config
            .backoff_base
            .saturating_mul(factor)
            .min(self.config.backoff_cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            heartbeat_interval: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }

    fn backoff_of(effects: &[Effect]) -> Option<Duration> {
        effects.iter().find_map(|e| match e {
            Effect::ArmBackoff { after, .. } => Some(*after),
            _ => None,
        })
    }

    fn statuses(effects: &[Effect]) -> Vec<ConnectionStatus> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Notify(status) => Some(*status),
                _ => None,
            })
            .collect()
    }

    /// Drive one failed cycle: failure signal, then (if scheduled) the
    /// backoff fire.
    fn fail_cycle(manager: &mut ConnectionManager) -> Vec<Effect> {
        let effects = manager.on_failure(FailureKind::ChannelError);
        if backoff_of(&effects).is_some() {
            manager.on_backoff_fired(manager.epoch());
        }
        effects
    }

    #[test]
    fn open_starts_connecting_and_subscribes() {
        let mut manager = ConnectionManager::new(config());
        let channel = ChannelId::new();
        let effects = manager.open(channel);

        assert!(effects.contains(&Effect::Subscribe(channel)));
        assert_eq!(manager.status(), ConnectionStatus::Connecting);
    }

    #[test]
    fn subscribed_connects_loads_history_and_arms_heartbeat() {
        let mut manager = ConnectionManager::new(config());
        let channel = ChannelId::new();
        manager.open(channel);
        let effects = manager.on_subscribed();

        assert_eq!(manager.status(), ConnectionStatus::Connected);
        assert!(effects.contains(&Effect::LoadHistory(channel)));
        assert!(matches!(
            effects.iter().find(|e| matches!(e, Effect::ArmHeartbeat { .. })),
            Some(Effect::ArmHeartbeat { after, .. }) if *after == Duration::from_secs(30)
        ));
    }

    #[test]
    fn backoff_delay_doubles_and_caps() {
        let mut manager = ConnectionManager::new(config());
        manager.open(ChannelId::new());

        let mut delays = Vec::new();
        loop {
            let effects = fail_cycle(&mut manager);
            match backoff_of(&effects) {
                Some(delay) => delays.push(delay),
                None => break,
            }
        }

        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ]
        );

        // A tighter cap clamps the growth.
        let mut capped = ConnectionManager::new(ConnectionConfig {
            backoff_cap: Duration::from_secs(3),
            ..config()
        });
        capped.open(ChannelId::new());
        let mut last = Duration::ZERO;
        loop {
            let effects = fail_cycle(&mut capped);
            match backoff_of(&effects) {
                Some(delay) => last = delay,
                None => break,
            }
        }
        assert_eq!(last, Duration::from_secs(3));
    }

    #[test]
    fn five_consecutive_errors_end_disconnected_with_no_further_attempt() {
        let mut manager = ConnectionManager::new(config());
        manager.open(ChannelId::new());

        let mut scheduled = 0;
        for _ in 0..5 {
            let effects = fail_cycle(&mut manager);
            if backoff_of(&effects).is_some() {
                scheduled += 1;
            }
        }

        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(scheduled, 4);

        // Further signals change nothing.
        assert!(manager.on_failure(FailureKind::ChannelError).is_empty());
    }

    #[test]
    fn failure_passes_through_errored_before_reconnecting() {
        let mut manager = ConnectionManager::new(config());
        manager.open(ChannelId::new());
        manager.on_subscribed();

        let effects = manager.on_failure(FailureKind::KeepaliveFailed);
        assert_eq!(
            statuses(&effects),
            vec![ConnectionStatus::Errored, ConnectionStatus::Reconnecting]
        );
    }

    #[test]
    fn stale_timers_are_noops_after_teardown() {
        let mut manager = ConnectionManager::new(config());
        manager.open(ChannelId::new());
        manager.on_subscribed();
        let old_epoch = manager.epoch();

        manager.close();
        assert!(manager.on_heartbeat_fired(old_epoch).is_empty());
        assert!(manager.on_backoff_fired(old_epoch).is_empty());
    }

    #[test]
    fn reopen_tears_down_and_resets_the_attempt_counter() {
        let mut manager = ConnectionManager::new(config());
        manager.open(ChannelId::new());
        fail_cycle(&mut manager);
        fail_cycle(&mut manager);
        assert_eq!(manager.attempt(), 2);

        let channel = ChannelId::new();
        let effects = manager.open(channel);
        assert_eq!(manager.attempt(), 0);
        assert_eq!(effects[0], Effect::Unsubscribe);
        assert!(effects.contains(&Effect::Subscribe(channel)));
    }

    #[test]
    fn close_is_idempotent() {
        let mut manager = ConnectionManager::new(config());
        manager.open(ChannelId::new());

        let first = manager.close();
        assert!(first.contains(&Effect::Notify(ConnectionStatus::Disconnected)));

        let second = manager.close();
        assert_eq!(second, vec![Effect::Unsubscribe]);
    }

    #[test]
    fn offline_forces_disconnected_and_cancels_timers() {
        let mut manager = ConnectionManager::new(config());
        manager.open(ChannelId::new());
        manager.on_subscribed();
        let heartbeat_epoch = manager.epoch();

        let effects = manager.on_network_offline();
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert!(effects.contains(&Effect::Unsubscribe));
        assert!(manager.on_heartbeat_fired(heartbeat_epoch).is_empty());
    }

    #[test]
    fn online_reconnects_exactly_once_when_a_channel_is_open() {
        let mut manager = ConnectionManager::new(config());
        let channel = ChannelId::new();
        manager.open(channel);
        manager.on_subscribed();
        manager.on_network_offline();

        let effects = manager.on_network_online();
        let subscribes = effects
            .iter()
            .filter(|e| matches!(e, Effect::Subscribe(_)))
            .count();
        assert_eq!(subscribes, 1);
        assert_eq!(manager.status(), ConnectionStatus::Connecting);

        // A second online signal while already connecting does nothing.
        assert!(manager.on_network_online().is_empty());
    }

    #[test]
    fn online_without_an_open_channel_stays_idle() {
        let mut manager = ConnectionManager::new(config());
        manager.on_network_offline();
        assert!(manager.on_network_online().is_empty());
    }

    #[test]
    fn failure_while_offline_does_not_schedule_a_retry() {
        let mut manager = ConnectionManager::new(config());
        manager.open(ChannelId::new());
        manager.on_subscribed();
        manager.on_network_offline();

        // A late failure signal after the offline teardown is ignored.
        assert!(manager.on_failure(FailureKind::TimedOut).is_empty());
    }
}
