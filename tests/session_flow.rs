use std::{sync::Arc, time::Duration};

use mohoot_host::{
    config::AppConfig,
    dao::{
        models::{PlayerPatch, SessionPin, SessionRecord, SessionStatus},
        session_store::{ParticipantWriter, SessionStore, memory::MemorySessionStore},
    },
    dto::{
        session::{ActionResponse, LaunchSessionRequest, QuestionInput, QuizInput, SessionView},
        sse::ServerEvent,
    },
    error::ServiceError,
    services::session_service,
    state::{AppState, CommandOutcome, HostAction, SessionHandle, SharedState},
};
use tokio::{
    sync::broadcast,
    time::{Instant, sleep},
};

const HOST: &str = "host-1";
const STEP: Duration = Duration::from_millis(10);
const WAIT_LIMIT: Duration = Duration::from_secs(60);

fn quiz(durations: &[u32]) -> LaunchSessionRequest {
    LaunchSessionRequest {
        quiz_id: "quiz-geo".into(),
        quiz: QuizInput {
            title: "Geography".into(),
            questions: durations
                .iter()
                .enumerate()
                .map(|(i, duration)| QuestionInput {
                    text: format!("Question {i}"),
                    image: None,
                    answers: vec!["a".into(), "b".into(), "c".into()],
                    correct: 1,
                    duration: *duration,
                })
                .collect(),
        },
    }
}

struct Harness {
    state: SharedState,
    store: MemorySessionStore,
    pin: SessionPin,
}

impl Harness {
    async fn launch(durations: &[u32]) -> Self {
        let state = AppState::new(AppConfig::default());
        let store = MemorySessionStore::new();
        state.install_session_store(Arc::new(store.clone())).await;

        let launched = session_service::launch_session(&state, HOST, quiz(durations))
            .await
            .expect("launch session");
        assert_eq!(launched.status, SessionStatus::Lobby);
        let pin: SessionPin = launched.pin.parse().expect("valid pin");

        let harness = Self { state, store, pin };
        harness
            .wait_for_view(|record| record.status == SessionStatus::Lobby)
            .await;
        harness
    }

    /// Launch and let `players` join, returning their writers.
    async fn launch_with_players(
        durations: &[u32],
        players: &[(&str, &str)],
    ) -> (Self, Vec<ParticipantWriter>) {
        let harness = Self::launch(durations).await;
        let mut writers = Vec::new();
        for (id, nickname) in players {
            let writer = harness.participant(id);
            writer.join(*nickname).await.expect("join");
            writers.push(writer);
        }
        let expected = players.len();
        harness
            .wait_for_view(|record| record.players.len() == expected)
            .await;
        (harness, writers)
    }

    fn participant(&self, id: &str) -> ParticipantWriter {
        ParticipantWriter::new(Arc::new(self.store.clone()), self.pin.clone(), id)
    }

    fn handle(&self) -> SessionHandle {
        self.state.session(&self.pin).expect("live session")
    }

    async fn record(&self) -> SessionRecord {
        self.store
            .read(&self.pin)
            .await
            .expect("read session")
            .expect("session exists")
    }

    fn view(&self) -> SessionView {
        session_service::session_view(&self.state, HOST, self.pin.as_str()).expect("session view")
    }

    async fn dispatch(&self, action: HostAction) -> Result<ActionResponse, ServiceError> {
        session_service::dispatch(&self.state, HOST, self.pin.as_str(), action).await
    }

    /// Wait until the driver has observed a snapshot satisfying `check`.
    async fn wait_for_view(&self, check: impl Fn(&SessionRecord) -> bool) -> Arc<SessionRecord> {
        let deadline = Instant::now() + WAIT_LIMIT;
        loop {
            if let Some(record) = self
                .state
                .session(&self.pin)
                .and_then(|handle| handle.view().record)
            {
                if check(&record) {
                    return record;
                }
            }
            assert!(
                Instant::now() < deadline,
                "driver never observed the expected session state"
            );
            sleep(STEP).await;
        }
    }

    async fn wait_for_phase(&self, status: SessionStatus, index: usize) -> Arc<SessionRecord> {
        self.wait_for_view(|record| {
            record.status == status && record.current_question_index == index
        })
        .await
    }
}

fn drain(events: &mut broadcast::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    received
}

fn named<'a>(events: &'a [ServerEvent], name: &str) -> Vec<&'a ServerEvent> {
    events
        .iter()
        .filter(|event| event.event.as_deref() == Some(name))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn two_question_session_runs_to_the_podium() {
    let (h, players) =
        Harness::launch_with_players(&[10, 10], &[("p1", "Ada"), ("p2", "Bob")]).await;
    let (ada, bob) = (&players[0], &players[1]);

    let started_at = h.state.clock().now();
    let started = h.dispatch(HostAction::Start).await.expect("start");
    assert_eq!(started.status, Some(SessionStatus::Question));

    let first = h.wait_for_phase(SessionStatus::Question, 0).await;
    let round1 = first.round_id.expect("round minted");
    let (start, end) = (first.start_time.unwrap(), first.end_time.unwrap());
    assert!(start >= started_at + 2_000);
    assert_eq!(end - start, 10_000);

    sleep(Duration::from_millis(2_100)).await;
    ada.set_score(900).await.unwrap();
    ada.answer(round1, 1).await.unwrap();
    bob.answer(round1, 0).await.unwrap();

    h.wait_for_phase(SessionStatus::Leaderboard, 0).await;
    assert_eq!(h.view().question.unwrap().correct, Some(1));

    let advanced = h.dispatch(HostAction::Advance).await.expect("advance");
    assert_eq!(advanced.status, Some(SessionStatus::Question));
    let second = h.wait_for_phase(SessionStatus::Question, 1).await;
    let round2 = second.round_id.expect("round minted");
    assert!(round2 > round1);

    // nobody answers: the window runs out on its own
    h.wait_for_phase(SessionStatus::Leaderboard, 1).await;
    assert!(h.state.clock().now() >= second.end_time.unwrap());

    let finished = h.dispatch(HostAction::Advance).await.expect("finish");
    assert_eq!(finished.status, Some(SessionStatus::Finished));
    h.wait_for_view(|record| record.status == SessionStatus::Finished)
        .await;

    let view = h.view();
    assert_eq!(view.questions_left, 0);
    assert_eq!(view.podium.len(), 2);
    assert_eq!(view.podium[0].nickname, "Ada");
    assert_eq!(view.podium[0].rank, 1);
    assert!(view.question.is_none());
}

#[tokio::test(start_paused = true)]
async fn stale_answer_is_not_counted_in_the_next_round() {
    let (h, players) =
        Harness::launch_with_players(&[10, 10], &[("p1", "Ada"), ("p2", "Bob")]).await;
    let (ada, bob) = (&players[0], &players[1]);

    h.dispatch(HostAction::Start).await.unwrap();
    let round1 = h
        .wait_for_phase(SessionStatus::Question, 0)
        .await
        .round_id
        .unwrap();
    ada.answer(round1, 1).await.unwrap();
    h.wait_for_view(|record| record.current_answered_count() == 1)
        .await;

    h.dispatch(HostAction::Skip).await.unwrap();
    h.wait_for_phase(SessionStatus::Leaderboard, 0).await;
    h.dispatch(HostAction::Advance).await.unwrap();
    let round2 = h
        .wait_for_phase(SessionStatus::Question, 1)
        .await
        .round_id
        .unwrap();

    let view = h.view();
    assert_eq!(view.answered, 0);
    assert_eq!(view.total, 2);

    // a late write carrying the previous round
    bob.answer(round1, 2).await.unwrap();
    sleep(Duration::from_millis(500)).await;
    assert_eq!(h.view().answered, 0);
    assert_eq!(h.record().await.status, SessionStatus::Question);

    ada.answer(round2, 0).await.unwrap();
    h.wait_for_view(|record| record.current_answered_count() == 1)
        .await;
    sleep(Duration::from_secs(3)).await;
    assert_eq!(h.record().await.status, SessionStatus::Question);
}

#[tokio::test(start_paused = true)]
async fn all_answered_closes_the_window_after_the_settle_delay() {
    let (h, players) =
        Harness::launch_with_players(&[30], &[("p1", "Ada"), ("p2", "Bob")]).await;
    let timing = AppConfig::default().timing;

    h.dispatch(HostAction::Start).await.unwrap();
    let round = h
        .wait_for_phase(SessionStatus::Question, 0)
        .await
        .round_id
        .unwrap();
    sleep(Duration::from_millis(2_100)).await;

    players[0].answer(round, 0).await.unwrap();
    players[1].answer(round, 1).await.unwrap();
    let completed_at = Instant::now();

    let deadline = completed_at + WAIT_LIMIT;
    loop {
        if h.record().await.status == SessionStatus::Leaderboard {
            break;
        }
        assert!(Instant::now() < deadline, "window never closed");
        sleep(STEP).await;
    }
    let elapsed = completed_at.elapsed();
    assert!(
        elapsed >= timing.settle_delay,
        "closed after {elapsed:?}, before the settle delay"
    );
    assert!(
        elapsed <= timing.settle_delay + timing.poll_interval + 2 * STEP,
        "closed after {elapsed:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn namesakes_without_uid_still_close_the_window_early() {
    let h = Harness::launch(&[30]).await;
    let timing = AppConfig::default().timing;
    let store: Arc<dyn SessionStore> = Arc::new(h.store.clone());

    for id in ["p1", "p2"] {
        let patch = PlayerPatch {
            nickname: Some("Sam".into()),
            ..PlayerPatch::default()
        };
        store.write_player(&h.pin, id, patch).await.expect("join");
    }
    h.wait_for_view(|record| record.players.len() == 2).await;

    h.dispatch(HostAction::Start).await.unwrap();
    let round = h
        .wait_for_phase(SessionStatus::Question, 0)
        .await
        .round_id
        .unwrap();
    sleep(Duration::from_millis(2_100)).await;

    for (id, answer) in [("p1", 0), ("p2", 2)] {
        let patch = PlayerPatch {
            last_answer_idx: Some(answer),
            last_answered_round_id: Some(round),
            ..PlayerPatch::default()
        };
        store.write_player(&h.pin, id, patch).await.expect("answer");
    }
    let completed_at = Instant::now();

    let record = h.wait_for_phase(SessionStatus::Leaderboard, 0).await;
    assert!(record.players.values().all(|player| player.uid.is_none()));
    let elapsed = completed_at.elapsed();
    assert!(
        elapsed <= timing.settle_delay + timing.poll_interval + 2 * STEP,
        "closed after {elapsed:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn duplicate_advance_moves_a_single_question() {
    let (h, _players) = Harness::launch_with_players(&[10, 10, 10], &[("p1", "Ada")]).await;

    h.dispatch(HostAction::Start).await.unwrap();
    h.wait_for_phase(SessionStatus::Question, 0).await;
    h.dispatch(HostAction::Skip).await.unwrap();
    h.wait_for_phase(SessionStatus::Leaderboard, 0).await;

    let handle = h.handle();
    let (first, second) = tokio::join!(
        handle.send(HostAction::Advance),
        handle.send(HostAction::Advance)
    );
    let outcomes = [first, second];
    let issued = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, Ok(CommandOutcome::Issued(_))))
        .count();
    assert_eq!(issued, 1);
    assert!(outcomes.iter().all(|outcome| matches!(
        outcome,
        Ok(CommandOutcome::Issued(SessionStatus::Question))
            | Ok(CommandOutcome::Duplicate(SessionStatus::Question))
            | Err(ServiceError::InvalidState(_))
    )));

    h.wait_for_phase(SessionStatus::Question, 1).await;
    sleep(Duration::from_millis(500)).await;
    let record = h.record().await;
    assert_eq!(record.status, SessionStatus::Question);
    assert_eq!(record.current_question_index, 1);
}

#[tokio::test(start_paused = true)]
async fn skip_racing_expiry_issues_one_leaderboard_write() {
    let (h, _players) = Harness::launch_with_players(&[1, 1], &[("p1", "Ada")]).await;

    h.dispatch(HostAction::Start).await.unwrap();
    h.wait_for_phase(SessionStatus::Question, 0).await;
    let mut events = h.handle().hub().subscribe();

    // grace period plus the one second window
    sleep(Duration::from_millis(3_000)).await;
    let skipped = h.dispatch(HostAction::Skip).await;
    assert!(matches!(
        skipped,
        Ok(ActionResponse {
            status: Some(SessionStatus::Leaderboard),
            ..
        }) | Err(ServiceError::InvalidState(_))
    ));

    h.wait_for_phase(SessionStatus::Leaderboard, 0).await;
    sleep(Duration::from_millis(500)).await;
    let received = drain(&mut events);
    let phases = named(&received, "phase_changed");
    assert_eq!(phases.len(), 1);
    assert!(phases[0].data.contains("\"LEADERBOARD\""));
    assert!(named(&received, "warning").is_empty());
}

#[tokio::test(start_paused = true)]
async fn top_ranks_are_withheld_in_the_final_stretch() {
    let players = [
        ("p1", "Ada"),
        ("p2", "Bob"),
        ("p3", "Cy"),
        ("p4", "Dee"),
    ];
    let (h, writers) = Harness::launch_with_players(&[5, 5, 5, 5, 5], &players).await;
    for (score, writer) in writers.iter().enumerate() {
        writer.set_score(100 * score as u32).await.unwrap();
    }
    h.wait_for_view(|record| record.players.values().any(|player| player.score == 300))
        .await;

    h.dispatch(HostAction::Start).await.unwrap();
    for index in 0..3 {
        h.wait_for_phase(SessionStatus::Question, index).await;
        h.dispatch(HostAction::Skip).await.unwrap();
        h.wait_for_phase(SessionStatus::Leaderboard, index).await;

        let view = h.view();
        if index < 2 {
            assert!(!view.standings_withheld, "question {index}");
            assert_eq!(view.standings.len(), 4);
            assert_eq!(view.standings[0].nickname, "Dee");
        } else {
            assert!(view.standings_withheld);
            assert_eq!(view.standings.len(), 1);
            assert_eq!(view.standings[0].rank, 4);
            assert_eq!(view.standings[0].nickname, "Ada");
        }
        h.dispatch(HostAction::Advance).await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn leaderboard_advances_by_itself_unless_held() {
    let (h, _players) = Harness::launch_with_players(&[10, 10], &[("p1", "Ada")]).await;

    h.dispatch(HostAction::Start).await.unwrap();
    h.wait_for_phase(SessionStatus::Question, 0).await;
    h.dispatch(HostAction::Skip).await.unwrap();
    h.wait_for_phase(SessionStatus::Leaderboard, 0).await;
    assert_eq!(h.view().auto_advance_secs, Some(5));

    sleep(Duration::from_millis(5_300)).await;
    assert_eq!(h.record().await.status, SessionStatus::Question);
    assert_eq!(h.record().await.current_question_index, 1);

    h.dispatch(HostAction::Skip).await.unwrap();
    h.wait_for_phase(SessionStatus::Leaderboard, 1).await;
    let held = h.dispatch(HostAction::Hold).await.expect("hold");
    assert_eq!(held.status, None);
    assert!(h.view().auto_advance_held);

    sleep(Duration::from_secs(8)).await;
    assert_eq!(h.record().await.status, SessionStatus::Leaderboard);

    h.dispatch(HostAction::Advance).await.unwrap();
    h.wait_for_view(|record| record.status == SessionStatus::Finished)
        .await;
}

#[tokio::test(start_paused = true)]
async fn hold_outside_the_leaderboard_is_rejected() {
    let (h, _players) = Harness::launch_with_players(&[10], &[("p1", "Ada")]).await;
    assert!(matches!(
        h.dispatch(HostAction::Hold).await,
        Err(ServiceError::InvalidState(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn store_outage_reports_a_warning_and_keeps_the_phase() {
    let (h, _players) = Harness::launch_with_players(&[10, 10], &[("p1", "Ada")]).await;

    h.dispatch(HostAction::Start).await.unwrap();
    h.wait_for_phase(SessionStatus::Question, 0).await;
    h.dispatch(HostAction::Skip).await.unwrap();
    h.wait_for_phase(SessionStatus::Leaderboard, 0).await;
    h.dispatch(HostAction::Hold).await.unwrap();

    let mut events = h.handle().hub().subscribe();
    h.store.set_online(false);
    let advanced = h.dispatch(HostAction::Advance).await;
    assert!(matches!(advanced, Err(ServiceError::Unavailable(_))));

    sleep(Duration::from_millis(500)).await;
    let received = drain(&mut events);
    assert_eq!(named(&received, "warning").len(), 1);
    assert!(named(&received, "phase_changed").is_empty());
    assert_eq!(h.record().await.status, SessionStatus::Leaderboard);
    assert_eq!(h.view().pending_transition, None);

    // the same command goes through once the store is back
    h.store.set_online(true);
    h.dispatch(HostAction::Advance).await.expect("advance after outage");
    h.wait_for_phase(SessionStatus::Question, 1).await;
}

#[tokio::test(start_paused = true)]
async fn start_requires_participants() {
    let h = Harness::launch(&[10]).await;
    assert!(matches!(
        h.dispatch(HostAction::Start).await,
        Err(ServiceError::InvalidState(_))
    ));
    assert_eq!(h.record().await.status, SessionStatus::Lobby);
}

#[tokio::test(start_paused = true)]
async fn empty_quiz_finishes_immediately() {
    let h = Harness::launch(&[]).await;
    let started = h.dispatch(HostAction::Start).await.expect("start");
    assert_eq!(started.status, Some(SessionStatus::Finished));
    h.wait_for_view(|record| record.status == SessionStatus::Finished)
        .await;
}

#[tokio::test(start_paused = true)]
async fn deleting_the_document_ends_the_session() {
    let h = Harness::launch(&[10]).await;
    let mut events = h.handle().hub().subscribe();

    h.store.delete(&h.pin).await.unwrap();

    let deadline = Instant::now() + WAIT_LIMIT;
    while h.state.session(&h.pin).is_some() {
        assert!(Instant::now() < deadline, "driver kept running");
        sleep(STEP).await;
    }

    let received = drain(&mut events);
    let ended = named(&received, "session.ended");
    assert_eq!(ended.len(), 1);
    assert!(ended[0].data.contains("deleted"));
    assert!(matches!(
        h.dispatch(HostAction::Start).await,
        Err(ServiceError::NotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn close_deletes_the_document() {
    let h = Harness::launch(&[10]).await;
    let closed = h.dispatch(HostAction::Close).await.expect("close");
    assert_eq!(closed.status, None);
    assert!(h.store.read(&h.pin).await.unwrap().is_none());

    let deadline = Instant::now() + WAIT_LIMIT;
    while h.state.session(&h.pin).is_some() {
        assert!(Instant::now() < deadline, "driver kept running");
        sleep(STEP).await;
    }
}

#[tokio::test(start_paused = true)]
async fn sessions_only_answer_to_their_host() {
    let h = Harness::launch(&[10]).await;
    assert!(matches!(
        session_service::session_view(&h.state, "someone-else", h.pin.as_str()),
        Err(ServiceError::Unauthorized(_))
    ));
    assert!(matches!(
        session_service::dispatch(&h.state, "someone-else", h.pin.as_str(), HostAction::Start)
            .await,
        Err(ServiceError::Unauthorized(_))
    ));
    assert!(matches!(
        session_service::dispatch(&h.state, HOST, "12345", HostAction::Start).await,
        Err(ServiceError::InvalidInput(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn restarted_host_reattaches_to_a_running_session() {
    let (h, _players) = Harness::launch_with_players(&[10, 10], &[("p1", "Ada")]).await;
    h.dispatch(HostAction::Start).await.unwrap();
    h.wait_for_phase(SessionStatus::Question, 0).await;

    let restarted = AppState::new(AppConfig::default());
    restarted
        .install_session_store(Arc::new(h.store.clone()))
        .await;

    assert!(matches!(
        session_service::attach_session(&restarted, "someone-else", h.pin.as_str()).await,
        Err(ServiceError::Unauthorized(_))
    ));
    let attached = session_service::attach_session(&restarted, HOST, h.pin.as_str())
        .await
        .expect("attach");
    assert_eq!(attached.status, Some(SessionStatus::Question));

    let handle = restarted.session(&h.pin).expect("driver registered");
    let deadline = Instant::now() + WAIT_LIMIT;
    while handle.view().record.is_none() {
        assert!(Instant::now() < deadline, "no snapshot after attach");
        sleep(STEP).await;
    }
    assert_eq!(
        handle.send(HostAction::Skip).await.unwrap(),
        CommandOutcome::Issued(SessionStatus::Leaderboard)
    );
}
