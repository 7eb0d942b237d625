//! Coalescing, failure isolation and exit handling of the broker loop,
//! driven by a scripted token source.

#![allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]

use std::collections::VecDeque;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use getuid_core::CloseStatus;

use super::*;
use crate::wake::WakeTrigger;

// =========================================================================
// Test doubles
// =========================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Token(String),
    Closed(CloseStatus, String),
}

struct RecordingSink {
    tx: mpsc::UnboundedSender<Outcome>,
    fail_sends: bool,
    attempts: AtomicUsize,
}

#[async_trait]
impl ReplySink for RecordingSink {
    async fn send_token(&self, token: &str) -> Result<(), ReplyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_sends {
            return Err(ReplyError::Closed);
        }
        self.tx
            .send(Outcome::Token(token.to_string()))
            .map_err(|_| ReplyError::Closed)
    }

    async fn close(&self, status: CloseStatus, reason: &str) -> Result<(), ReplyError> {
        self.tx
            .send(Outcome::Closed(status, reason.to_string()))
            .map_err(|_| ReplyError::Closed)
    }
}

struct Client {
    sink: Arc<RecordingSink>,
    cancel: CancellationToken,
    outcomes: mpsc::UnboundedReceiver<Outcome>,
}

impl Client {
    fn new() -> Self {
        Self::with_failing_sends(false)
    }

    fn with_failing_sends(fail_sends: bool) -> Self {
        let (tx, outcomes) = mpsc::unbounded_channel();
        Self {
            sink: Arc::new(RecordingSink {
                tx,
                fail_sends,
                attempts: AtomicUsize::new(0),
            }),
            cancel: CancellationToken::new(),
            outcomes,
        }
    }

    fn request(&self) -> Request {
        Request::new(self.sink.clone(), self.cancel.clone())
    }

    fn request_at(&self, at: Instant) -> Request {
        Request::arrived_at(self.sink.clone(), self.cancel.clone(), at)
    }

    async fn outcome(&mut self) -> Outcome {
        timeout(Duration::from_secs(5), self.outcomes.recv())
            .await
            .expect("no outcome delivered")
            .expect("sink dropped")
    }
}

/// Wake trigger that only counts invocations.
#[derive(Debug, Clone, Default)]
struct CountingWake {
    count: Arc<AtomicUsize>,
}

impl CountingWake {
    fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl WakeTrigger for CountingWake {
    fn wake(&self, _tasks: &TaskTracker) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Token source that replays canned round-trip results.
struct ScriptedSource {
    script: VecDeque<Result<String, RoundTripError>>,
    round_trips: Arc<AtomicUsize>,
    exit_rx: oneshot::Receiver<()>,
}

impl ScriptedSource {
    fn new(
        script: Vec<Result<String, RoundTripError>>,
    ) -> (Self, Arc<AtomicUsize>, oneshot::Sender<()>) {
        let round_trips = Arc::new(AtomicUsize::new(0));
        let (exit_tx, exit_rx) = oneshot::channel();
        let source = Self {
            script: script.into(),
            round_trips: Arc::clone(&round_trips),
            exit_rx,
        };
        (source, round_trips, exit_tx)
    }

    fn tokens(tokens: &[&str]) -> (Self, Arc<AtomicUsize>, oneshot::Sender<()>) {
        Self::new(tokens.iter().map(|t| Ok((*t).to_string())).collect())
    }
}

#[async_trait]
impl TokenSource for ScriptedSource {
    async fn produce(&mut self) -> Result<String, RoundTripError> {
        self.round_trips.fetch_add(1, Ordering::SeqCst);
        self.script.pop_front().unwrap_or(Err(RoundTripError::Eof))
    }

    async fn exited(&mut self) -> GenerationExit {
        // A dropped sender means "never exits".
        match (&mut self.exit_rx).await {
            Ok(()) => GenerationExit::Exited(ExitStatus::from_raw(0)),
            Err(_) => std::future::pending().await,
        }
    }
}

struct Harness {
    inbound: mpsc::Sender<Request>,
    wake: CountingWake,
    exits: mpsc::UnboundedReceiver<LoopExit>,
    handle: JoinHandle<Broker>,
}

/// Run the broker over `sources` one generation after another.
fn start(sources: Vec<ScriptedSource>) -> Harness {
    let (inbound, rx) = mpsc::channel(16);
    let wake = CountingWake::default();
    let mut broker = Broker::new(rx, Arc::new(wake.clone()), TaskTracker::new());
    let (exit_tx, exits) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        for mut source in sources {
            let exit = broker.run(&mut source).await;
            let closed = matches!(exit, LoopExit::InboundClosed);
            let _ = exit_tx.send(exit);
            if closed {
                break;
            }
        }
        broker
    });
    Harness {
        inbound,
        wake,
        exits,
        handle,
    }
}

impl Harness {
    async fn send(&self, request: Request) {
        self.inbound.send(request).await.unwrap();
    }

    async fn next_exit(&mut self) -> LoopExit {
        timeout(Duration::from_secs(5), self.exits.recv())
            .await
            .expect("broker loop did not return")
            .expect("broker task ended")
    }

    /// Close the inbound channel, drain deliveries, return the last exit.
    async fn finish(mut self) -> LoopExit {
        drop(self.inbound);
        let broker = timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("broker loop did not stop")
            .unwrap();
        broker.tasks().close();
        broker.tasks().wait().await;
        let mut last = None;
        while let Ok(exit) = self.exits.try_recv() {
            last = Some(exit);
        }
        last.expect("no loop exit recorded")
    }
}

/// Make sure later `Instant::now()` stamps are strictly after anything the
/// broker has recorded so far.
async fn tick() {
    sleep(Duration::from_millis(2)).await;
}

// =========================================================================
// Coalescing
// =========================================================================

#[tokio::test]
async fn overlapping_requests_share_one_round_trip() {
    let (source, round_trips, _exit) = ScriptedSource::tokens(&["A", "B", "C"]);
    let harness = start(vec![source]);
    let mut c1 = Client::new();
    let mut c2 = Client::new();
    let mut c3 = Client::new();

    // Both arrive before the first round trip can complete.
    let arrival = Instant::now();
    harness.send(c1.request_at(arrival)).await;
    harness.send(c2.request_at(arrival)).await;

    assert_eq!(c1.outcome().await, Outcome::Token("A".to_string()));
    assert_eq!(c2.outcome().await, Outcome::Token("A".to_string()));
    assert_eq!(round_trips.load(Ordering::SeqCst), 1);

    tick().await;
    harness.send(c3.request()).await;
    assert_eq!(c3.outcome().await, Outcome::Token("B".to_string()));
    assert_eq!(round_trips.load(Ordering::SeqCst), 2);

    assert_eq!(harness.wake.count(), 2);
    assert!(matches!(harness.finish().await, LoopExit::InboundClosed));
}

#[tokio::test]
async fn each_later_request_gets_a_fresh_token() {
    let (source, round_trips, _exit) = ScriptedSource::tokens(&["t1", "t2", "t3"]);
    let harness = start(vec![source]);

    for expected in ["t1", "t2", "t3"] {
        let mut client = Client::new();
        tick().await;
        harness.send(client.request()).await;
        assert_eq!(client.outcome().await, Outcome::Token(expected.to_string()));
    }
    assert_eq!(round_trips.load(Ordering::SeqCst), 3);
    assert_eq!(harness.wake.count(), 3);
    harness.finish().await;
}

#[tokio::test]
async fn first_request_reads_even_for_empty_token() {
    let (source, round_trips, _exit) = ScriptedSource::tokens(&[""]);
    let harness = start(vec![source]);
    let mut c1 = Client::new();
    let mut c2 = Client::new();

    let arrival = Instant::now();
    harness.send(c1.request_at(arrival)).await;
    harness.send(c2.request_at(arrival)).await;

    // An empty token is a real token: the second request coalesces.
    assert_eq!(c1.outcome().await, Outcome::Token(String::new()));
    assert_eq!(c2.outcome().await, Outcome::Token(String::new()));
    assert_eq!(round_trips.load(Ordering::SeqCst), 1);
    harness.finish().await;
}

// =========================================================================
// Failure isolation
// =========================================================================

#[tokio::test]
async fn write_failure_closes_only_that_request() {
    let (source, round_trips, _exit) = ScriptedSource::new(vec![
        Err(RoundTripError::Write(io::Error::from(io::ErrorKind::BrokenPipe))),
        Ok("A".to_string()),
    ]);
    let harness = start(vec![source]);
    let mut c1 = Client::new();
    let mut c2 = Client::new();

    // Same arrival: without a successful round trip there is nothing to share.
    let arrival = Instant::now();
    harness.send(c1.request_at(arrival)).await;
    harness.send(c2.request_at(arrival)).await;

    assert_eq!(
        c1.outcome().await,
        Outcome::Closed(CloseStatus::InternalError, "write failed".to_string())
    );
    assert_eq!(c2.outcome().await, Outcome::Token("A".to_string()));
    assert_eq!(round_trips.load(Ordering::SeqCst), 2);
    assert_eq!(harness.wake.count(), 1);
    harness.finish().await;
}

#[tokio::test]
async fn read_failure_keeps_previous_state() {
    let (source, round_trips, _exit) = ScriptedSource::new(vec![
        Ok("A".to_string()),
        Err(RoundTripError::Eof),
        Ok("B".to_string()),
    ]);
    let harness = start(vec![source]);
    let mut c1 = Client::new();
    let mut c2 = Client::new();
    let mut c3 = Client::new();

    harness.send(c1.request()).await;
    assert_eq!(c1.outcome().await, Outcome::Token("A".to_string()));

    tick().await;
    harness.send(c2.request()).await;
    assert_eq!(
        c2.outcome().await,
        Outcome::Closed(CloseStatus::InternalError, "read failed".to_string())
    );

    tick().await;
    harness.send(c3.request()).await;
    assert_eq!(c3.outcome().await, Outcome::Token("B".to_string()));
    assert_eq!(round_trips.load(Ordering::SeqCst), 3);
    assert_eq!(harness.wake.count(), 2);
    harness.finish().await;
}

#[tokio::test]
async fn failed_reply_to_cancelled_client_does_not_stall_loop() {
    let (source, _round_trips, _exit) = ScriptedSource::tokens(&["A", "B"]);
    let harness = start(vec![source]);
    let gone = Client::with_failing_sends(true);
    gone.cancel.cancel();
    let mut next = Client::new();

    harness.send(gone.request()).await;
    tick().await;
    harness.send(next.request()).await;
    assert_eq!(next.outcome().await, Outcome::Token("B".to_string()));

    harness.finish().await;
    assert_eq!(gone.sink.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn delivery_outcome_depends_on_client_cancellation() {
    let ok = Client::new();
    let delivery = deliver_token(ok.sink.clone(), ok.cancel.clone(), "A".to_string()).await;
    assert_eq!(delivery, Delivery::Sent);

    let gone = Client::with_failing_sends(true);
    gone.cancel.cancel();
    let delivery = deliver_token(gone.sink.clone(), gone.cancel.clone(), "A".to_string()).await;
    assert_eq!(delivery, Delivery::ClientGone);

    let broken = Client::with_failing_sends(true);
    let delivery =
        deliver_token(broken.sink.clone(), broken.cancel.clone(), "A".to_string()).await;
    assert_eq!(delivery, Delivery::Failed);
}

// =========================================================================
// Generation exit
// =========================================================================

#[tokio::test]
async fn exit_ends_loop_and_next_generation_starts_fresh() {
    let (first, first_trips, exit_first) = ScriptedSource::tokens(&["old"]);
    let (second, second_trips, _exit_second) = ScriptedSource::tokens(&["new"]);
    let mut harness = start(vec![first, second]);

    let mut c1 = Client::new();
    let arrival = Instant::now();
    harness.send(c1.request_at(arrival)).await;
    assert_eq!(c1.outcome().await, Outcome::Token("old".to_string()));

    exit_first.send(()).unwrap();
    assert!(matches!(
        harness.next_exit().await,
        LoopExit::ProcessExited(GenerationExit::Exited(_))
    ));

    // Same arrival as the request already answered by the old generation:
    // the new loop has no token yet, so it must read.
    let mut c2 = Client::new();
    harness.send(c2.request_at(arrival)).await;
    assert_eq!(c2.outcome().await, Outcome::Token("new".to_string()));
    assert_eq!(first_trips.load(Ordering::SeqCst), 1);
    assert_eq!(second_trips.load(Ordering::SeqCst), 1);
    assert!(matches!(harness.finish().await, LoopExit::InboundClosed));
}

#[tokio::test]
async fn request_queued_with_exit_goes_to_next_generation() {
    let (first, first_trips, exit_first) = ScriptedSource::tokens(&["old"]);
    let (second, second_trips, _exit_second) = ScriptedSource::tokens(&["new"]);
    let mut harness = start(vec![first, second]);
    tick().await;

    // Both become ready before the broker task is polled again.
    exit_first.send(()).unwrap();
    let mut client = Client::new();
    harness.send(client.request()).await;

    assert!(matches!(
        harness.next_exit().await,
        LoopExit::ProcessExited(GenerationExit::Exited(_))
    ));
    assert_eq!(client.outcome().await, Outcome::Token("new".to_string()));
    assert_eq!(first_trips.load(Ordering::SeqCst), 0);
    assert_eq!(second_trips.load(Ordering::SeqCst), 1);
    assert!(matches!(harness.finish().await, LoopExit::InboundClosed));
}
