//! Producer stage lifecycle.
//!
//! A [`ProducerStage`] turns a [`WorkSource`] into a running pipeline source.
//! The lifecycle is strictly ordered:
//!
//! 1. [`init`](ProducerStage::init) opens telemetry and initializes the source,
//!    synchronously, on the caller's thread.
//! 2. [`start`](ProducerStage::start) spawns the stage's own thread, which
//!    streams every item to the channel the router picks for it. Each send
//!    waits for the downstream reply, so the producer is never more than one
//!    item ahead of its consumer.
//! 3. [`finish`](ProducerStage::finish) hands control back to the source once
//!    the stage thread is done.
//!
//! Progress is observed through the telemetry hub; the accessors on the stage
//! only give best-effort snapshots of the thread's state.

mod runner;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::telemetry::{TelemetryChannel, TelemetryHub, DEFAULT_TELEMETRY_CAPACITY};
use crate::traits::{Router, WorkSource};
use runner::StageRunner;

pub(crate) type BoxedSource<P> = Box<dyn WorkSource<Payload = P>>;

/// Configuration for a producer stage
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Identity reported by the stage
    pub identity: String,
    /// Upper bound on each request/reply exchange; `None` waits forever
    pub send_timeout: Option<Duration>,
    /// Buffer of the telemetry hub created when none is injected
    pub telemetry_capacity: usize,
    /// Stack size of the stage thread; `None` uses the platform default
    pub thread_stack_size: Option<usize>,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            identity: "id_producer".to_string(),
            send_timeout: None,
            telemetry_capacity: DEFAULT_TELEMETRY_CAPACITY,
            thread_stack_size: None,
        }
    }
}

/// Outcome of a stage thread
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Items whose send completed
    pub nb_job_done: u64,
    /// Cause that aborted the streaming loop, if any
    pub failure: Option<Error>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// State written by the stage thread and read by everyone else
pub(crate) struct StageState<P> {
    pub(crate) running: AtomicBool,
    pub(crate) nb_job_done: AtomicU64,
    pub(crate) done: AtomicBool,
    pub(crate) failure: Mutex<Option<Error>>,
    /// The work source, handed back by the thread before `done` is set
    pub(crate) source: Mutex<Option<BoxedSource<P>>>,
}

impl<P> StageState<P> {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            nb_job_done: AtomicU64::new(0),
            done: AtomicBool::new(false),
            failure: Mutex::new(None),
            source: Mutex::new(None),
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A pipeline source stage running on its own thread.
///
/// # Examples
///
/// ```rust
/// use pipeweld::prelude::*;
///
/// # fn main() -> pipeweld::Result<()> {
/// let (tx, rx) = request_channel::<u32>(1);
/// let consumer = std::thread::spawn(move || {
///     tokio::runtime::Runtime::new().unwrap().block_on(rx.collect_all())
/// });
///
/// let mut stage = ProducerStage::new("producer", Connexions::new("next", tx))
///     .source(VecSource::new(vec![Item::plain(1), Item::plain(2)]));
///
/// stage.init()?;
/// stage.start()?;
/// let report = stage.join()?;
/// assert_eq!(report.nb_job_done, 2);
/// assert!(stage.finish());
///
/// drop(stage);
/// assert_eq!(consumer.join().unwrap(), vec![1, 2]);
/// # Ok(())
/// # }
/// ```
pub struct ProducerStage<P> {
    name: String,
    config: ProducerConfig,
    router: Arc<dyn Router<P>>,
    source: Option<BoxedSource<P>>,
    telemetry_address: Option<String>,
    hub: Option<TelemetryHub>,
    telemetry: Option<TelemetryChannel>,
    initialized: bool,
    started: bool,
    finished: bool,
    state: Arc<StageState<P>>,
    thread: Option<JoinHandle<RunReport>>,
    report: Option<RunReport>,
}

impl<P: Send + 'static> ProducerStage<P> {
    /// Create a stage routing through `router`
    pub fn new<R>(name: impl Into<String>, router: R) -> Self
    where
        R: Router<P> + 'static,
    {
        Self::with_router(name, Arc::new(router))
    }

    /// Create a stage sharing an existing router
    pub fn with_router(name: impl Into<String>, router: Arc<dyn Router<P>>) -> Self {
        Self {
            name: name.into(),
            config: ProducerConfig::default(),
            router,
            source: None,
            telemetry_address: None,
            hub: None,
            telemetry: None,
            initialized: false,
            started: false,
            finished: false,
            state: Arc::new(StageState::new()),
            thread: None,
            report: None,
        }
    }

    /// Set the work source
    pub fn source<W>(mut self, source: W) -> Self
    where
        W: WorkSource<Payload = P>,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Set the remote monitor address (`host:port`)
    pub fn telemetry_address(mut self, address: impl Into<String>) -> Self {
        self.telemetry_address = Some(address.into());
        self
    }

    /// Publish telemetry into an existing hub
    pub fn monitor(mut self, hub: TelemetryHub) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ProducerConfig) -> Self {
        self.config = config;
        self
    }

    /// Bound each request/reply exchange
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.config.send_timeout = Some(timeout);
        self
    }

    /// The hub this stage publishes into, created on first use
    pub fn telemetry_hub(&mut self) -> TelemetryHub {
        let capacity = self.config.telemetry_capacity;
        self.hub
            .get_or_insert_with(|| TelemetryHub::new(capacity))
            .clone()
    }

    /// Open telemetry and initialize the work source.
    ///
    /// Returns `Ok(true)` when the stage is ready to [`start`](Self::start).
    pub fn init(&mut self) -> Result<bool> {
        if self.initialized {
            return Err(Error::AlreadyInitialized {
                stage: self.name.clone(),
            });
        }

        let mut telemetry = TelemetryChannel::open(self.telemetry_hub());
        if let Some(address) = &self.telemetry_address {
            if let Err(e) = telemetry.connect(address) {
                tracing::error!(stage = %self.name, error = %e, "telemetry connection failed");
                return Err(e);
            }
        }

        let source = self.source.as_mut().ok_or_else(|| Error::MissingWorkSource {
            stage: self.name.clone(),
        })?;
        if !source.init() {
            return Err(Error::WorkSourceInit {
                stage: self.name.clone(),
            });
        }

        self.telemetry = Some(telemetry);
        self.initialized = true;
        tracing::info!(stage = %self.name, identity = %self.config.identity, "producer stage initialized");
        Ok(true)
    }

    /// Spawn the stage thread and start streaming.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(Error::AlreadyStarted {
                stage: self.name.clone(),
            });
        }
        if !self.initialized {
            return Err(Error::NotInitialized {
                stage: self.name.clone(),
            });
        }

        let (telemetry, source) = match (self.telemetry.take(), self.source.take()) {
            (Some(telemetry), Some(source)) => (telemetry, source),
            _ => {
                return Err(Error::NotInitialized {
                    stage: self.name.clone(),
                })
            }
        };
        self.started = true;

        let runner = StageRunner {
            name: self.name.clone(),
            source,
            router: Arc::clone(&self.router),
            telemetry,
            send_timeout: self.config.send_timeout,
            state: Arc::clone(&self.state),
        };

        let mut builder = thread::Builder::new().name(self.name.clone());
        if let Some(size) = self.config.thread_stack_size {
            builder = builder.stack_size(size);
        }
        let handle = builder
            .spawn(move || runner.run_blocking())
            .map_err(|e| Error::Spawn(Arc::new(e)))?;

        tracing::info!(stage = %self.name, "producer stage started");
        self.thread = Some(handle);
        Ok(())
    }

    /// Block until the stage thread ends.
    ///
    /// Fails with [`Error::NotStarted`] when [`start`](Self::start) has not
    /// spawned the thread yet.
    pub fn join(&mut self) -> Result<RunReport> {
        if let Some(report) = &self.report {
            return Ok(report.clone());
        }

        let handle = self.thread.take().ok_or_else(|| Error::NotStarted {
            stage: self.name.clone(),
        })?;
        let report = handle.join().map_err(|_| Error::StagePanicked {
            stage: self.name.clone(),
        })?;

        self.report = Some(report.clone());
        Ok(report)
    }

    /// Hand control back to the work source once the stage is done.
    ///
    /// This checks once and never waits: `false` means the stage thread is
    /// still streaming and the caller should retry later (or [`join`](Self::join)
    /// first). After the first `true`, further calls return `true` without
    /// calling the source again.
    pub fn finish(&mut self) -> bool {
        if !self.state.done.load(Ordering::SeqCst) {
            return false;
        }
        if self.finished {
            return true;
        }

        if let Some(mut source) = lock(&self.state.source).take() {
            source.finish();
        }
        self.finished = true;
        tracing::debug!(stage = %self.name, "work source finished");
        true
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(&self) -> &str {
        &self.config.identity
    }

    /// Whether a send is in flight (best effort)
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Items sent so far (best effort)
    pub fn nb_job_done(&self) -> u64 {
        self.state.nb_job_done.load(Ordering::SeqCst)
    }

    /// Whether the streaming loop has ended
    pub fn is_done(&self) -> bool {
        self.state.done.load(Ordering::SeqCst)
    }

    /// The cause that aborted the streaming loop, if any
    pub fn failure(&self) -> Option<Error> {
        lock(&self.state.failure).clone()
    }
}

impl<P> std::fmt::Debug for ProducerStage<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerStage")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("telemetry_address", &self.telemetry_address)
            .field("initialized", &self.initialized)
            .field("started", &self.started)
            .field("done", &self.state.done.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::request_channel;
    use crate::item::Item;
    use crate::router::Connexions;
    use crate::sources::VecSource;
    use crate::traits::WorkStream;
    use std::sync::atomic::AtomicUsize;
    use tokio_test::assert_err;

    struct FlakySource {
        ready: bool,
        finishes: Arc<AtomicUsize>,
    }

    impl WorkSource for FlakySource {
        type Payload = u32;

        fn init(&mut self) -> bool {
            self.ready
        }

        fn run(&mut self) -> Option<WorkStream<u32>> {
            None
        }

        fn finish(&mut self) {
            self.finishes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn router() -> Connexions<u32> {
        let (tx, _rx) = request_channel(1);
        Connexions::new("main", tx)
    }

    #[test]
    fn test_init_without_source() {
        let mut stage = ProducerStage::new("producer", router());
        let err = assert_err!(stage.init());
        assert!(matches!(err, Error::MissingWorkSource { stage } if stage == "producer"));
    }

    #[test]
    fn test_init_source_refuses() {
        let mut stage = ProducerStage::new("producer", router()).source(FlakySource {
            ready: false,
            finishes: Arc::new(AtomicUsize::new(0)),
        });
        assert!(matches!(stage.init(), Err(Error::WorkSourceInit { .. })));
        assert!(matches!(stage.start(), Err(Error::NotInitialized { .. })));
    }

    #[test]
    fn test_init_twice() {
        let mut stage =
            ProducerStage::new("producer", router()).source(VecSource::<u32>::new(vec![]));
        assert!(stage.init().unwrap());
        assert!(matches!(
            stage.init(),
            Err(Error::AlreadyInitialized { .. })
        ));
    }

    #[test]
    fn test_join_before_start() {
        let mut stage =
            ProducerStage::new("producer", router()).source(VecSource::<u32>::new(vec![]));
        assert!(matches!(stage.join(), Err(Error::NotStarted { .. })));
        stage.init().unwrap();
        assert!(matches!(stage.join(), Err(Error::NotStarted { stage }) if stage == "producer"));
    }

    #[test]
    fn test_init_bad_telemetry_address() {
        let mut stage = ProducerStage::new("producer", router())
            .source(VecSource::<u32>::new(vec![]))
            .telemetry_address("definitely not reachable");
        assert!(matches!(stage.init(), Err(Error::Connection { .. })));
    }

    #[test]
    fn test_defaults() {
        let stage = ProducerStage::new("producer", router());
        assert_eq!(stage.name(), "producer");
        assert_eq!(stage.identity(), "id_producer");
        assert!(!stage.is_running());
        assert!(!stage.is_done());
        assert_eq!(stage.nb_job_done(), 0);
        assert!(stage.failure().is_none());
    }

    #[test]
    fn test_no_sequence_completes_empty() {
        let finishes = Arc::new(AtomicUsize::new(0));
        let hub = TelemetryHub::default();
        let mut subscriber = hub.subscribe();
        let mut stage = ProducerStage::new("producer", router())
            .monitor(hub)
            .source(FlakySource {
                ready: true,
                finishes: finishes.clone(),
            });

        assert!(!stage.finish());
        stage.init().unwrap();
        stage.start().unwrap();
        let report = stage.join().unwrap();

        assert!(report.is_success());
        assert_eq!(report.nb_job_done, 0);
        assert!(stage.is_done());

        let snapshots = subscriber.drain();
        assert_eq!(snapshots.len(), 1);
        assert!(!snapshots[0].running);

        assert!(stage.finish());
        assert!(stage.finish());
        assert_eq!(finishes.load(Ordering::SeqCst), 1);
        assert!(matches!(stage.start(), Err(Error::AlreadyStarted { .. })));
    }
}
