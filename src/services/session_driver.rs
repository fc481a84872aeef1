//! One task per attached session. The driver owns the state machine of its
//! session and is the only place host writes are issued from.

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use tokio::{
    sync::{mpsc, watch},
    time::{Instant, MissedTickBehavior, interval, sleep, sleep_until, timeout},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::TimingConfig,
    dao::{
        models::{SessionPin, SessionRecord, SessionStatus},
        session_store::{HostWriter, SessionStore},
    },
    error::ServiceError,
    services::sse_events,
    state::{
        CommandOutcome, HostAction, HostCommand, LiveView, PlanError, SessionHandle, SharedState,
        SseHub,
        events::{AnswerTracker, DerivedEvent, NotificationBoard},
        state_machine::{HostEvent, SessionStateMachine},
        timing::{HostClock, is_expired, remaining_secs},
    },
};

const COMMAND_BUFFER: usize = 16;
const HUB_CAPACITY: usize = 64;
/// Pause before the expiry poll retries a failed expiry write.
const EXPIRY_RETRY_DELAY: Duration = Duration::from_secs(1);
const RESUBSCRIBE_INITIAL_DELAY: Duration = Duration::from_millis(500);
const RESUBSCRIBE_MAX_DELAY: Duration = Duration::from_secs(10);

/// Leaderboard auto-advance countdown.
#[derive(Debug, Default)]
struct AutoAdvance {
    deadline: Option<Instant>,
    held: bool,
    last_announced: Option<u64>,
}

impl AutoAdvance {
    fn armed(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::default()
        }
    }

    fn remaining_secs(&self, now: Instant) -> Option<u64> {
        self.deadline.map(|deadline| {
            (deadline.saturating_duration_since(now).as_millis() as u64).div_ceil(1_000)
        })
    }
}

/// Start a driver for `pin` and register it in the live session registry.
pub fn spawn(
    state: SharedState,
    store: Arc<dyn SessionStore>,
    pin: SessionPin,
    host_id: impl Into<Arc<str>>,
) -> SessionHandle {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let (view_tx, view_rx) = watch::channel(LiveView::default());
    let hub = Arc::new(SseHub::new(HUB_CAPACITY));
    let handle = SessionHandle::new(host_id, command_tx, view_rx, hub.clone());

    let timing = state.config().timing;
    let driver = SessionDriver {
        id: handle.id(),
        writer: HostWriter::new(store, pin.clone()),
        clock: *state.clock(),
        machine: SessionStateMachine::new(),
        tracker: AnswerTracker::new(),
        notifications: NotificationBoard::new(timing.notification_lifetime),
        hub,
        view: view_tx,
        latest: None,
        settle_at: None,
        auto_advance: AutoAdvance::default(),
        last_timer_secs: None,
        expiry_retry_at: None,
        timing,
        pin: pin.clone(),
        state: state.clone(),
    };

    state.register_session(pin, handle.clone());
    tokio::spawn(driver.run(command_rx));
    handle
}

struct SessionDriver {
    state: SharedState,
    id: Uuid,
    pin: SessionPin,
    writer: HostWriter,
    timing: TimingConfig,
    clock: HostClock,
    machine: SessionStateMachine,
    tracker: AnswerTracker,
    notifications: NotificationBoard,
    hub: Arc<SseHub>,
    view: watch::Sender<LiveView>,
    latest: Option<Arc<SessionRecord>>,
    settle_at: Option<Instant>,
    auto_advance: AutoAdvance,
    last_timer_secs: Option<u64>,
    expiry_retry_at: Option<Instant>,
}

impl SessionDriver {
    async fn run(mut self, mut commands: mpsc::Receiver<HostCommand>) {
        let mut snapshots = self.writer.subscribe();
        let mut poll = interval(self.timing.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut resubscribe_delay = RESUBSCRIBE_INITIAL_DELAY;
        info!(pin = %self.pin, driver = %self.id, "session driver started");

        loop {
            let settle_at = self.settle_at;
            tokio::select! {
                command = commands.recv() => {
                    let Some(HostCommand { action, reply }) = command else {
                        debug!(pin = %self.pin, "session handle dropped; stopping driver");
                        break;
                    };
                    let result = self.handle_action(action).await;
                    let closed = matches!(result, Ok(CommandOutcome::Closed));
                    if reply.send(result).is_err() {
                        debug!(pin = %self.pin, ?action, "host stopped waiting for command outcome");
                    }
                    if closed {
                        break;
                    }
                }
                next = snapshots.next() => match next {
                    Some(Ok(Some(record))) => {
                        resubscribe_delay = RESUBSCRIBE_INITIAL_DELAY;
                        self.on_snapshot(record);
                    }
                    Some(Ok(None)) => {
                        info!(pin = %self.pin, "session document deleted");
                        sse_events::broadcast_session_ended(&self.hub, self.pin.as_str(), "deleted");
                        break;
                    }
                    Some(Err(err)) => {
                        warn!(pin = %self.pin, error = %err, "session subscription error");
                        sse_events::broadcast_warning(
                            &self.hub,
                            format!("session updates interrupted: {err}"),
                        );
                    }
                    None => {
                        warn!(
                            pin = %self.pin,
                            delay_ms = resubscribe_delay.as_millis() as u64,
                            "session subscription ended; resubscribing"
                        );
                        sleep(resubscribe_delay).await;
                        resubscribe_delay = (resubscribe_delay * 2).min(RESUBSCRIBE_MAX_DELAY);
                        snapshots = self.writer.subscribe();
                    }
                },
                _ = poll.tick() => self.on_tick().await,
                _ = sleep_until(settle_at.unwrap_or_else(Instant::now)), if settle_at.is_some() => {
                    self.settle_at = None;
                    self.on_settled().await;
                }
            }
        }

        self.state.remove_session(&self.pin, self.id);
        info!(pin = %self.pin, driver = %self.id, "session driver stopped");
    }

    fn on_snapshot(&mut self, record: SessionRecord) {
        let record = Arc::new(record);

        if self.machine.observe(&record) {
            self.on_phase_changed(&record);
        }

        for event in self.tracker.update(&record) {
            match event {
                DerivedEvent::PlayerAnswered {
                    round,
                    participant,
                    nickname,
                } => {
                    debug!(pin = %self.pin, %round, participant = %participant, "player answered");
                    self.notifications
                        .show(participant.clone(), nickname.clone(), Instant::now());
                    sse_events::broadcast_player_answered(&self.hub, round, &participant, &nickname);
                }
                DerivedEvent::AnswerCountChanged {
                    round,
                    answered,
                    total,
                } => sse_events::broadcast_answers(&self.hub, round, answered, total),
                DerivedEvent::AllAnswered { round } => {
                    info!(pin = %self.pin, %round, "every participant answered");
                    self.settle_at = Some(Instant::now() + self.timing.settle_delay);
                }
            }
        }
        if !self.tracker.all_answered() {
            self.settle_at = None;
        }

        self.latest = Some(record);
        self.publish_view();
    }

    fn on_phase_changed(&mut self, record: &SessionRecord) {
        self.last_timer_secs = None;
        self.settle_at = None;
        self.expiry_retry_at = None;
        if let Some(dismissed) = self.notifications.clear() {
            sse_events::broadcast_notification_dismissed(&self.hub, &dismissed.participant);
        }

        self.auto_advance = if record.status == SessionStatus::Leaderboard {
            AutoAdvance::armed(Instant::now() + self.timing.leaderboard_auto_advance)
        } else {
            AutoAdvance::default()
        };

        info!(
            pin = %self.pin,
            status = ?record.status,
            index = record.current_question_index,
            round = ?record.round_id,
            "session phase changed"
        );
        sse_events::broadcast_phase_changed(&self.hub, record);
    }

    async fn on_tick(&mut self) {
        let now = Instant::now();
        if let Some(dismissed) = self.notifications.expire(now) {
            sse_events::broadcast_notification_dismissed(&self.hub, &dismissed.participant);
            self.publish_view();
        }

        let Some(record) = self.latest.clone() else {
            return;
        };
        match record.status {
            SessionStatus::Question => self.poll_expiry(&record, now).await,
            SessionStatus::Leaderboard => self.poll_auto_advance(now).await,
            SessionStatus::Lobby | SessionStatus::Finished => {}
        }
    }

    async fn poll_expiry(&mut self, record: &SessionRecord, now: Instant) {
        let (Some(round), Some(end_time)) = (record.round_id, record.end_time) else {
            return;
        };
        let wall_now = self.clock.now();

        let secs = remaining_secs(end_time, wall_now);
        if self.last_timer_secs != Some(secs) {
            self.last_timer_secs = Some(secs);
            sse_events::broadcast_timer(&self.hub, round, secs, end_time);
        }

        if !is_expired(end_time, wall_now) {
            return;
        }
        if self.expiry_retry_at.is_some_and(|at| now < at) {
            return;
        }
        self.expiry_retry_at = match self.run_transition(HostEvent::Expire).await {
            Ok(_) => None,
            Err(_) => Some(Instant::now() + EXPIRY_RETRY_DELAY),
        };
    }

    async fn poll_auto_advance(&mut self, now: Instant) {
        if self.auto_advance.held {
            return;
        }
        let Some(secs) = self.auto_advance.remaining_secs(now) else {
            return;
        };
        if self.auto_advance.last_announced != Some(secs) {
            self.auto_advance.last_announced = Some(secs);
            sse_events::broadcast_leaderboard_countdown(&self.hub, secs, false);
        }
        if secs > 0 {
            return;
        }

        self.auto_advance.deadline = None;
        debug!(pin = %self.pin, "leaderboard countdown elapsed");
        // a failed write is reported; the host advances manually
        if let Err(err) = self.run_transition(HostEvent::Advance).await {
            debug!(pin = %self.pin, event = ?HostEvent::Advance, error = %err, "auto-advance not retried");
        }
    }

    async fn on_settled(&mut self) {
        debug!(pin = %self.pin, "settle delay elapsed; shortening answer window");
        if let Err(err) = self.run_transition(HostEvent::AllAnswered).await {
            debug!(pin = %self.pin, event = ?HostEvent::AllAnswered, error = %err, "window left to expire on its own");
        }
    }

    async fn handle_action(&mut self, action: HostAction) -> Result<CommandOutcome, ServiceError> {
        let event = match action {
            HostAction::Start => HostEvent::StartGame,
            HostAction::Skip => HostEvent::SkipQuestion,
            HostAction::Advance => HostEvent::Advance,
            HostAction::Hold => return self.hold(),
            HostAction::Close => return self.close().await,
        };
        self.run_transition(event).await
    }

    fn hold(&mut self) -> Result<CommandOutcome, ServiceError> {
        let on_leaderboard = self
            .latest
            .as_ref()
            .is_some_and(|record| record.status == SessionStatus::Leaderboard);
        if !on_leaderboard {
            return Err(ServiceError::InvalidState(
                "auto-advance can only be held on the leaderboard".into(),
            ));
        }

        if !self.auto_advance.held {
            self.auto_advance.held = true;
            let secs = self.auto_advance.remaining_secs(Instant::now()).unwrap_or(0);
            sse_events::broadcast_leaderboard_countdown(&self.hub, secs, true);
            self.publish_view();
        }
        Ok(CommandOutcome::Held)
    }

    async fn close(&mut self) -> Result<CommandOutcome, ServiceError> {
        if let Err(err) = self.writer.delete().await {
            warn!(pin = %self.pin, error = %err, "failed to delete session");
            sse_events::broadcast_warning(&self.hub, format!("could not close session: {err}"));
            return Err(err.into());
        }
        info!(pin = %self.pin, "session closed by host");
        sse_events::broadcast_session_ended(&self.hub, self.pin.as_str(), "closed");
        Ok(CommandOutcome::Closed)
    }

    /// Plan `event` against the latest snapshot, issue its write and record
    /// the outcome. The phase itself only moves when the snapshot carrying
    /// the write comes back.
    async fn run_transition(&mut self, event: HostEvent) -> Result<CommandOutcome, ServiceError> {
        let Some(record) = self.latest.clone() else {
            return Err(ServiceError::InvalidState(
                "no session snapshot received yet".into(),
            ));
        };

        let plan = match self.machine.plan(
            &record,
            event,
            self.clock.now(),
            self.timing.grace_period,
        ) {
            Ok(plan) => plan,
            Err(PlanError::Redundant { to }) => {
                debug!(pin = %self.pin, ?event, target = ?to, "transition already issued");
                return Ok(CommandOutcome::Duplicate(to));
            }
            Err(err) => return Err(err.into()),
        };
        let plan_id = plan.id;
        self.publish_view();

        let write = self.writer.write(plan.patch.clone());
        let outcome = match self.timing.transition_timeout {
            Some(limit) => match timeout(limit, write).await {
                Ok(result) => result.map_err(ServiceError::from),
                Err(_) => Err(ServiceError::Timeout),
            },
            None => write.await.map_err(ServiceError::from),
        };

        let result = match outcome {
            Ok(()) => self
                .machine
                .apply(plan_id)
                .map(CommandOutcome::Issued)
                .map_err(ServiceError::from),
            Err(err) => {
                if let Err(abort_err) = self.machine.abort(plan_id) {
                    warn!(
                        pin = %self.pin,
                        ?event,
                        plan_id = %plan_id,
                        error = ?abort_err,
                        "failed to abort transition after write error"
                    );
                }
                Err(err)
            }
        };

        match &result {
            Ok(_) => info!(pin = %self.pin, ?event, target = ?plan.to, "transition write issued"),
            Err(err) => {
                warn!(pin = %self.pin, ?event, target = ?plan.to, error = %err, "transition write failed");
                sse_events::broadcast_warning(
                    &self.hub,
                    format!("could not move session to {:?}: {err}", plan.to),
                );
            }
        }
        self.publish_view();
        result
    }

    fn publish_view(&self) {
        self.view.send_replace(LiveView {
            record: self.latest.clone(),
            auto_advance_at: self.auto_advance.deadline,
            auto_advance_held: self.auto_advance.held,
            pending: self.machine.snapshot().pending,
            notification: self
                .notifications
                .visible()
                .map(|notification| notification.nickname.clone()),
        });
    }
}
