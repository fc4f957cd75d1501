//! Shared fixtures for integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use strictly_sessions::{
    ChannelSink, Coordinator, CoordinatorBuilder, ManualClock, MemoryStore, MoveComputer,
    NewSession, Notification, NotificationKind, Participant, RecordingScheduler, Rules, Seat,
    Session, SessionOf, SessionStore, Settings, StoreError, TimeControl, Versioned,
};
use tokio::sync::mpsc::UnboundedReceiver;

/// A coordinator wired to controllable collaborators.
pub struct Harness<R: Rules> {
    pub coordinator: Coordinator<R>,
    pub clock: Arc<ManualClock>,
    pub scheduler: Arc<RecordingScheduler>,
    pub notifications: UnboundedReceiver<Notification>,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0)
        .single()
        .expect("valid start time")
}

pub struct HarnessBuilder<R: Rules> {
    rules: R,
    settings: Settings,
    computer: Option<Arc<dyn MoveComputer<R>>>,
    store: Option<Arc<dyn SessionStore<R::Board, R::Action>>>,
}

impl<R: Rules> HarnessBuilder<R> {
    pub fn new(rules: R) -> Self {
        Self {
            rules,
            settings: Settings::default(),
            computer: None,
            store: None,
        }
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn computer(mut self, computer: Arc<dyn MoveComputer<R>>) -> Self {
        self.computer = Some(computer);
        self
    }

    pub fn store(mut self, store: Arc<dyn SessionStore<R::Board, R::Action>>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Harness<R> {
        let clock = Arc::new(ManualClock::new(start_time()));
        let scheduler = Arc::new(RecordingScheduler::new());
        let (sink, notifications) = ChannelSink::new();

        let mut builder = CoordinatorBuilder::new(self.rules, scheduler.clone())
            .clock(clock.clone())
            .notifier(Arc::new(sink))
            .settings(self.settings);
        if let Some(computer) = self.computer {
            builder = builder.computer(computer);
        }
        if let Some(store) = self.store {
            builder = builder.store(store);
        }

        Harness {
            coordinator: builder.build(),
            clock,
            scheduler,
            notifications,
        }
    }
}

impl<R: Rules> Harness<R> {
    pub fn new(rules: R) -> Self {
        HarnessBuilder::new(rules).build()
    }

    pub fn advance(&self, seconds: i64) {
        self.clock.advance(Duration::seconds(seconds));
    }

    /// Alice (first seat) against Bob, both human, already accepted.
    pub fn humans(&self, seconds: Option<u32>) -> SessionOf<R> {
        let session = self
            .coordinator
            .create_session(NewSession::new(
                Participant::human("alice"),
                Participant::human("bob"),
                Seat::First,
                seconds.map(TimeControl::new),
            ))
            .expect("create failed");
        self.coordinator
            .accept(session.id(), "bob")
            .expect("accept failed")
    }

    /// Alice against the computer, which accepts on the spot.
    pub fn versus_agent(&self, seat: Seat, seconds: Option<u32>) -> SessionOf<R> {
        self.coordinator
            .create_session(NewSession::new(
                Participant::human("alice"),
                Participant::agent("bot"),
                seat,
                seconds.map(TimeControl::new),
            ))
            .expect("create failed")
    }

    /// Everything delivered so far.
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            out.push(n);
        }
        out
    }

    /// Kinds delivered to `participant` so far.
    pub fn kinds_for(&mut self, participant: &str) -> Vec<NotificationKind> {
        self.drain_notifications()
            .into_iter()
            .filter(|n| n.participant == participant)
            .map(|n| n.kind)
            .collect()
    }
}

type Competitor = Box<dyn FnOnce() + Send>;

/// A store that lets a rival writer commit between a transaction's read and
/// its write.
///
/// Each queued competitor runs once, right before the next outside `replace`
/// reaches the backing store. Writes made by the competitor itself pass
/// straight through.
pub struct RacingStore<B, A> {
    inner: MemoryStore<B, A>,
    competitors: Mutex<VecDeque<Competitor>>,
    racing: AtomicBool,
}

impl<B, A> RacingStore<B, A> {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            competitors: Mutex::new(VecDeque::new()),
            racing: AtomicBool::new(false),
        }
    }

    /// Queues a write to land inside the next transaction.
    pub fn compete(&self, competitor: impl FnOnce() + Send + 'static) {
        self.competitors
            .lock()
            .expect("competitor queue poisoned")
            .push_back(Box::new(competitor));
    }
}

impl<B, A> SessionStore<B, A> for RacingStore<B, A>
where
    B: Clone + Send,
    A: Clone + Send,
{
    fn insert(&self, session: &Session<B, A>) -> Result<u64, StoreError> {
        self.inner.insert(session)
    }

    fn load(&self, id: &str) -> Result<Option<Versioned<B, A>>, StoreError> {
        self.inner.load(id)
    }

    fn replace(&self, expected_version: u64, session: &Session<B, A>) -> Result<u64, StoreError> {
        if !self.racing.swap(true, Ordering::SeqCst) {
            let next = self
                .competitors
                .lock()
                .expect("competitor queue poisoned")
                .pop_front();
            if let Some(competitor) = next {
                competitor();
            }
            self.racing.store(false, Ordering::SeqCst);
        }
        self.inner.replace(expected_version, session)
    }

    fn list(&self) -> Result<Vec<Session<B, A>>, StoreError> {
        self.inner.list()
    }
}
