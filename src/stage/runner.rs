//! The streaming loop executed on a producer stage's own thread.

use futures::StreamExt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::{lock, BoxedSource, RunReport, StageState};
use crate::error::{Error, Result};
use crate::telemetry::{StatusSnapshot, TelemetryChannel};
use crate::traits::{Channel, Router, WorkStream};

/// Everything the stage thread owns while it streams
pub(crate) struct StageRunner<P> {
    pub(crate) name: String,
    pub(crate) source: BoxedSource<P>,
    pub(crate) router: Arc<dyn Router<P>>,
    pub(crate) telemetry: TelemetryChannel,
    pub(crate) send_timeout: Option<Duration>,
    pub(crate) state: Arc<StageState<P>>,
}

impl<P: Send + 'static> StageRunner<P> {
    /// Entry point of the stage thread
    pub(crate) fn run_blocking(self) -> RunReport {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build();

        match runtime {
            Ok(runtime) => runtime.block_on(self.run()),
            Err(e) => {
                let failure = Error::custom(format!("failed to build stage runtime: {}", e));
                self.conclude(Err(failure))
            }
        }
    }

    /// Drain the work source's sequence, then report the outcome
    pub(crate) async fn run(mut self) -> RunReport {
        let outcome = match self.source.run() {
            Some(stream) => {
                self.publish_status();
                self.stream(stream).await
            }
            None => {
                let warning = Error::MalformedSequence {
                    stage: self.name.clone(),
                };
                tracing::warn!(
                    stage = %self.name,
                    "{}; the stage completes with zero jobs done",
                    warning
                );
                Ok(())
            }
        };

        self.conclude(outcome)
    }

    async fn stream(&mut self, mut stream: WorkStream<P>) -> Result<()> {
        while let Some(item) = stream.next().await {
            let (payload, label) = item.into_parts();
            let channel = match label {
                Some(label) => match self.router.resolve(&label) {
                    Some(channel) => channel,
                    None => return Err(Error::Routing { label }),
                },
                None => self.router.default_channel(),
            };

            self.state.running.store(true, Ordering::SeqCst);
            self.publish_status();

            let sent = self.send(channel.as_ref(), payload).await;
            self.state.running.store(false, Ordering::SeqCst);
            sent?;

            let done = self.state.nb_job_done.fetch_add(1, Ordering::SeqCst) + 1;
            self.publish_status();
            tracing::trace!(stage = %self.name, nb_job_done = done, "item sent");

            #[cfg(feature = "metrics")]
            metrics::counter!("pipeweld_producer_items_sent_total", "stage" => self.name.clone())
                .increment(1);
        }

        Ok(())
    }

    async fn send(&self, channel: &dyn Channel<P>, payload: P) -> Result<()> {
        match self.send_timeout {
            Some(limit) => tokio::time::timeout(limit, channel.request(payload))
                .await
                .map_err(|_| Error::timeout_after(limit))?,
            None => channel.request(payload).await,
        }
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot::new(
            self.name.clone(),
            self.state.running.load(Ordering::SeqCst),
            self.state.nb_job_done.load(Ordering::SeqCst),
        )
    }

    fn publish_status(&mut self) {
        let snapshot = self.snapshot();
        self.telemetry.publish(&snapshot);
    }

    /// Publish the terminal snapshot, close telemetry, hand the source back and mark done
    fn conclude(mut self, outcome: Result<()>) -> RunReport {
        self.state.running.store(false, Ordering::SeqCst);

        let failure = outcome.err();
        match &failure {
            None => self.publish_status(),
            Some(e) => {
                if e.is_item_failure() {
                    tracing::error!(stage = %self.name, error = %e, "streaming loop aborted");
                } else {
                    tracing::error!(stage = %self.name, error = %e, "producer stage failed");
                }
                #[cfg(feature = "metrics")]
                metrics::counter!("pipeweld_producer_failures_total", "stage" => self.name.clone())
                    .increment(1);

                let snapshot = self.snapshot().with_failure(e);
                self.telemetry.publish(&snapshot);
            }
        }

        let StageRunner {
            name,
            source,
            telemetry,
            state,
            ..
        } = self;
        let published = telemetry.close();

        *lock(&state.failure) = failure.clone();
        *lock(&state.source) = Some(source);
        state.done.store(true, Ordering::SeqCst);

        let nb_job_done = state.nb_job_done.load(Ordering::SeqCst);
        tracing::info!(stage = %name, nb_job_done, published, "producer stage done");

        RunReport {
            nb_job_done,
            failure,
        }
    }
}
