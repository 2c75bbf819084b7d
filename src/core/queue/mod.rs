//! # Queue Module
//!
//! Single-flight scheduling for an expensive, occasionally hanging detector.
//!
//! ## Threads
//! - **dispatcher** - takes requests in FIFO order and hands exactly one at a
//!   time to the executor, enforcing the per-request timeout
//! - **executor** - owns the detector instance; created lazily on first use
//!   and re-created after a timeout or crash
//!
//! No caller ever touches the detector directly. A request that runs past
//! its timeout resolves as `TimedOut`; its executor is abandoned (the
//! detector is dropped once the stuck call returns) and the next request
//! initializes a fresh one. The stuck job is told to stop through a token
//! the queue owns, never through the one the caller submitted with.
//!
//! ## Example
//! ```rust,ignore
//! let queue = SingleFlightQueue::new("text", Duration::from_secs(10), || Ok(MyDetector::load()?))?;
//! let ticket = queue.submit(CancellationToken::new(), |detector, token| detector.run(token));
//! match ticket.wait() {
//!     JobOutcome::Completed(words) => { /* ... */ }
//!     JobOutcome::Cancelled => { /* ... */ }
//!     JobOutcome::TimedOut => { /* ... */ }
//!     JobOutcome::Failed(err) => { /* ... */ }
//! }
//! ```

use crate::error::DetectorError;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How often waiting threads look at cancellation flags
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Cooperative cancellation flag shared between a caller and its request.
///
/// A child token observes its parent's cancellation, but cancelling the
/// child never reaches the parent.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    parent: Option<Arc<CancellationToken>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that is cancelled with `self` or on its own
    pub fn child(&self) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::new(self.clone())),
        }
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.parent.as_ref().is_some_and(|parent| parent.is_cancelled())
    }
}

/// How a queued request resolved
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome<T> {
    /// The detector produced a result
    Completed(T),
    /// Cancelled before or while running
    Cancelled,
    /// Ran past the queue timeout; the detector was torn down
    TimedOut,
    /// The detector failed, could not be initialized, or crashed
    Failed(DetectorError),
}

/// Snapshot of queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub submitted: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub timed_out: usize,
    pub failed: usize,
    /// Times the detector factory was invoked
    pub initializations: usize,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicUsize,
    completed: AtomicUsize,
    cancelled: AtomicUsize,
    timed_out: AtomicUsize,
    failed: AtomicUsize,
    initializations: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> QueueStats {
        QueueStats {
            submitted: self.submitted.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            cancelled: self.cancelled.load(Ordering::SeqCst),
            timed_out: self.timed_out.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            initializations: self.initializations.load(Ordering::SeqCst),
        }
    }
}

type Job<D, T> = Box<dyn FnOnce(&mut D, &CancellationToken) -> Result<T, DetectorError> + Send>;
type Factory<D> = Arc<dyn Fn() -> Result<D, DetectorError> + Send + Sync>;

struct Request<D, T> {
    job: Job<D, T>,
    token: CancellationToken,
    reply: Sender<JobOutcome<T>>,
}

/// Handle to a submitted request
pub struct Ticket<T> {
    outcome: Receiver<JobOutcome<T>>,
    token: CancellationToken,
}

impl<T> Ticket<T> {
    fn resolved(outcome: JobOutcome<T>) -> Self {
        let (tx, rx) = bounded(1);
        let _ = tx.send(outcome);
        Self {
            outcome: rx,
            token: CancellationToken::new(),
        }
    }

    /// Cancel this request only; the token it was submitted with is untouched
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Outcome if the request has already resolved
    pub fn try_outcome(&self) -> Option<JobOutcome<T>> {
        match self.outcome.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(JobOutcome::Failed(DetectorError::QueueClosed)),
        }
    }

    /// Block until the request resolves.
    ///
    /// Returns `Cancelled` as soon as the token is set, without waiting for
    /// the dispatcher to reach the request.
    pub fn wait(self) -> JobOutcome<T> {
        loop {
            match self.outcome.recv_timeout(CANCEL_POLL_INTERVAL) {
                Ok(outcome) => return outcome,
                Err(RecvTimeoutError::Timeout) => {
                    if self.token.is_cancelled() {
                        return match self.outcome.try_recv() {
                            Ok(outcome) => outcome,
                            Err(_) => JobOutcome::Cancelled,
                        };
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return JobOutcome::Failed(DetectorError::QueueClosed)
                }
            }
        }
    }
}

/// Runs detector jobs one at a time, in submission order.
///
/// `D` is the detector, built by the factory on the executor thread, so it
/// does not need to be `Send`. `T` is the job result.
pub struct SingleFlightQueue<D, T> {
    name: String,
    requests: Option<Sender<Request<D, T>>>,
    dispatcher: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
    timeout: Duration,
}

impl<D: 'static, T: Send + 'static> SingleFlightQueue<D, T> {
    /// Start the dispatcher; the detector is built on first use
    pub fn new<F>(name: &str, timeout: Duration, factory: F) -> Result<Self, DetectorError>
    where
        F: Fn() -> Result<D, DetectorError> + Send + Sync + 'static,
    {
        let (tx, rx) = unbounded::<Request<D, T>>();
        let counters = Arc::new(Counters::default());

        let dispatcher = Dispatcher {
            name: name.to_string(),
            factory: Arc::new(factory),
            counters: counters.clone(),
            timeout,
            executor: None,
        };

        let handle = thread::Builder::new()
            .name(format!("{}-dispatcher", name))
            .spawn(move || dispatcher.run(rx))
            .map_err(|e| DetectorError::InitFailed(e.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            requests: Some(tx),
            dispatcher: Some(handle),
            counters,
            timeout,
        })
    }

    /// Queue a job; it runs after every previously submitted job.
    ///
    /// The job sees a child of `token`: cancelling `token` stops it, while
    /// the queue only ever cancels the child.
    pub fn submit<F>(&self, token: CancellationToken, job: F) -> Ticket<T>
    where
        F: FnOnce(&mut D, &CancellationToken) -> Result<T, DetectorError> + Send + 'static,
    {
        let Some(requests) = &self.requests else {
            return Ticket::resolved(JobOutcome::Failed(DetectorError::QueueClosed));
        };

        let token = token.child();
        let (reply, outcome) = bounded(1);
        let request = Request {
            job: Box::new(job),
            token: token.clone(),
            reply,
        };

        if requests.send(request).is_err() {
            return Ticket::resolved(JobOutcome::Failed(DetectorError::QueueClosed));
        }
        self.counters.submitted.fetch_add(1, Ordering::SeqCst);

        Ticket { outcome, token }
    }

    pub fn stats(&self) -> QueueStats {
        self.counters.snapshot()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<D, T> Drop for SingleFlightQueue<D, T> {
    fn drop(&mut self) {
        self.requests.take();
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
    }
}

/// Channels to a live executor thread
struct Executor<D, T> {
    jobs: Sender<(Job<D, T>, CancellationToken)>,
    results: Receiver<Result<T, DetectorError>>,
}

struct Dispatcher<D, T> {
    name: String,
    factory: Factory<D>,
    counters: Arc<Counters>,
    timeout: Duration,
    executor: Option<Executor<D, T>>,
}

impl<D: 'static, T: Send + 'static> Dispatcher<D, T> {
    fn run(mut self, requests: Receiver<Request<D, T>>) {
        for request in requests.iter() {
            self.dispatch(request);
        }
        debug!(queue = %self.name, "queue closed");
    }

    fn dispatch(&mut self, request: Request<D, T>) {
        let Request { job, token, reply } = request;

        if token.is_cancelled() {
            self.counters.cancelled.fetch_add(1, Ordering::SeqCst);
            let _ = reply.send(JobOutcome::Cancelled);
            return;
        }

        let executor = match self.executor.take() {
            Some(executor) => executor,
            None => match self.spawn_executor() {
                Ok(executor) => executor,
                Err(err) => {
                    self.fail(&reply, err);
                    return;
                }
            },
        };

        // Stops the job on timeout without touching the request's token.
        let job_token = token.child();
        if executor.jobs.send((job, job_token.clone())).is_err() {
            self.fail(&reply, DetectorError::Crashed);
            return;
        }

        let deadline = Instant::now() + self.timeout;
        let mut replied = false;

        loop {
            let now = Instant::now();
            if now >= deadline {
                warn!(queue = %self.name, timeout = ?self.timeout, "detector timed out, tearing it down");
                if !replied {
                    self.counters.timed_out.fetch_add(1, Ordering::SeqCst);
                    let _ = reply.send(JobOutcome::TimedOut);
                }
                job_token.cancel();
                // Dropping the executor disconnects it; the thread exits once the stuck job returns.
                return;
            }

            match executor
                .results
                .recv_timeout((deadline - now).min(CANCEL_POLL_INTERVAL))
            {
                Ok(result) => {
                    let keep = !matches!(result, Err(DetectorError::InitFailed(_)));
                    if !replied {
                        match result {
                            Ok(value) => {
                                self.counters.completed.fetch_add(1, Ordering::SeqCst);
                                let _ = reply.send(JobOutcome::Completed(value));
                            }
                            Err(err) => self.fail(&reply, err),
                        }
                    }
                    if keep {
                        self.executor = Some(executor);
                    }
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {
                    if !replied && token.is_cancelled() {
                        self.counters.cancelled.fetch_add(1, Ordering::SeqCst);
                        let _ = reply.send(JobOutcome::Cancelled);
                        replied = true;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!(queue = %self.name, "detector executor stopped unexpectedly");
                    if !replied {
                        self.fail(&reply, DetectorError::Crashed);
                    }
                    return;
                }
            }
        }
    }

    fn fail(&self, reply: &Sender<JobOutcome<T>>, err: DetectorError) {
        self.counters.failed.fetch_add(1, Ordering::SeqCst);
        let _ = reply.send(JobOutcome::Failed(err));
    }

    fn spawn_executor(&self) -> Result<Executor<D, T>, DetectorError> {
        let (jobs_tx, jobs_rx) = unbounded::<(Job<D, T>, CancellationToken)>();
        let (results_tx, results_rx) = bounded::<Result<T, DetectorError>>(1);
        let factory = self.factory.clone();
        let counters = self.counters.clone();
        let name = self.name.clone();

        thread::Builder::new()
            .name(format!("{}-executor", self.name))
            .spawn(move || {
                counters.initializations.fetch_add(1, Ordering::SeqCst);
                let mut detector = match factory() {
                    Ok(detector) => detector,
                    Err(err) => {
                        let err = match err {
                            DetectorError::InitFailed(_) => err,
                            other => DetectorError::InitFailed(other.to_string()),
                        };
                        let _ = results_tx.send(Err(err));
                        return;
                    }
                };
                debug!(queue = %name, "detector initialized");

                for (job, token) in jobs_rx.iter() {
                    let result = job(&mut detector, &token);
                    if results_tx.send(result).is_err() {
                        break;
                    }
                }
                debug!(queue = %name, "detector released");
            })
            .map_err(|e| DetectorError::InitFailed(e.to_string()))?;

        Ok(Executor {
            jobs: jobs_tx,
            results: results_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        calls: usize,
    }

    fn counter_queue(timeout: Duration) -> SingleFlightQueue<Counter, usize> {
        SingleFlightQueue::new("test", timeout, || Ok(Counter { calls: 0 })).unwrap()
    }

    #[test]
    fn completes_job_with_detector_state() {
        let queue = counter_queue(Duration::from_secs(5));

        let first = queue.submit(CancellationToken::new(), |d, _| {
            d.calls += 1;
            Ok(d.calls)
        });
        let second = queue.submit(CancellationToken::new(), |d, _| {
            d.calls += 1;
            Ok(d.calls)
        });

        assert_eq!(first.wait(), JobOutcome::Completed(1));
        assert_eq!(second.wait(), JobOutcome::Completed(2));
        assert_eq!(queue.stats().initializations, 1);
    }

    #[test]
    fn cancelled_before_dispatch_never_runs() {
        let queue = counter_queue(Duration::from_secs(5));
        let token = CancellationToken::new();
        token.cancel();

        let ticket = queue.submit(token, |_, _| panic!("must not run"));

        assert_eq!(ticket.wait(), JobOutcome::Cancelled);
        assert_eq!(queue.stats().initializations, 0);
    }

    #[test]
    fn detector_errors_are_failed_outcomes() {
        let queue = counter_queue(Duration::from_secs(5));
        let ticket = queue.submit(CancellationToken::new(), |_, _| {
            Err(DetectorError::Failed("bad input".into()))
        });

        assert_eq!(
            ticket.wait(),
            JobOutcome::Failed(DetectorError::Failed("bad input".into()))
        );
    }

    #[test]
    fn init_failure_is_retried_on_next_request() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = attempts.clone();
        let queue: SingleFlightQueue<Counter, usize> =
            SingleFlightQueue::new("flaky", Duration::from_secs(5), move || {
                if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(DetectorError::Failed("model missing".into()))
                } else {
                    Ok(Counter { calls: 0 })
                }
            })
            .unwrap();

        let first = queue.submit(CancellationToken::new(), |_, _| Ok(1)).wait();
        assert!(matches!(first, JobOutcome::Failed(DetectorError::InitFailed(_))));

        let second = queue.submit(CancellationToken::new(), |_, _| Ok(2)).wait();
        assert_eq!(second, JobOutcome::Completed(2));
        assert_eq!(queue.stats().initializations, 2);
    }

    #[test]
    fn panicking_job_reports_crash() {
        let queue = counter_queue(Duration::from_secs(5));
        let ticket = queue.submit(CancellationToken::new(), |_, _| panic!("detector blew up"));
        assert_eq!(ticket.wait(), JobOutcome::Failed(DetectorError::Crashed));

        let next = queue.submit(CancellationToken::new(), |_, _| Ok(7)).wait();
        assert_eq!(next, JobOutcome::Completed(7));
    }

    #[test]
    fn child_token_follows_parent_but_not_back() {
        let parent = CancellationToken::new();
        let child = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let other = parent.child();
        parent.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn timeout_leaves_submitted_token_usable() {
        let queue = counter_queue(Duration::from_millis(50));
        let shared = CancellationToken::new();
        let stopped = Arc::new(AtomicBool::new(false));

        let flag = stopped.clone();
        let hung = queue.submit(shared.clone(), move |_, token| {
            while !token.is_cancelled() {
                thread::sleep(Duration::from_millis(2));
            }
            flag.store(true, Ordering::SeqCst);
            Ok(0)
        });
        assert_eq!(hung.wait(), JobOutcome::TimedOut);
        assert!(!shared.is_cancelled());

        let next = queue.submit(shared.clone(), |d, _| {
            d.calls += 1;
            Ok(d.calls)
        });
        assert_eq!(next.wait(), JobOutcome::Completed(1));
        assert_eq!(queue.stats().initializations, 2);

        // The abandoned job was told to stop through its own token.
        for _ in 0..100 {
            if stopped.load(Ordering::SeqCst) {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn cancelling_a_ticket_leaves_submitted_token_alone() {
        let queue = counter_queue(Duration::from_secs(5));
        let shared = CancellationToken::new();

        let busy = queue.submit(shared.clone(), |_, _| {
            thread::sleep(Duration::from_millis(50));
            Ok(1)
        });
        let queued = queue.submit(shared.clone(), |_, _| Ok(2));
        queued.cancel();

        assert_eq!(queued.wait(), JobOutcome::Cancelled);
        assert_eq!(busy.wait(), JobOutcome::Completed(1));
        assert!(!shared.is_cancelled());
    }

    #[test]
    fn resolved_ticket_is_immediately_available() {
        let ticket: Ticket<u8> = Ticket::resolved(JobOutcome::Completed(3));
        assert_eq!(ticket.try_outcome(), Some(JobOutcome::Completed(3)));
    }
}
