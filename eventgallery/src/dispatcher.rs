//! Post-processing dispatcher.
//!
//! [`PostProcessor::run`] subscribes to the trigger events, starts a pool of
//! workers sharing the subscription and returns a [`DispatcherHandle`] with a
//! results channel and an errors channel.
//!
//! Each worker handles one event at a time: filters, fetch, process, then
//! optionally fetch again, apply and save, retrying on concurrency conflicts.
//! Every send on an output channel races against the cancellation token, so
//! a worker never hangs on a full channel after shutdown.
//!
//! Workers do not coordinate. Two stacks of the same gallery handled by
//! different workers at the same time can conflict on save; the retry loop
//! absorbs that up to `max_save_attempts`. Run a single worker when events of
//! one gallery must be applied in order.

use crate::config::DispatcherConfig;
use crate::errors::{DispatchError, ProcessorError};
use crate::event::{EventKind, GalleryEvent, StoredEvent};
use crate::model::Id;
use crate::pipeline::Pipeline;
use crate::processor::{ApplyOptions, ProcessableGallery, Processor, ProcessorResult};
use crate::store::{EventBus, GalleryFetcher, GallerySaver};
use crate::types::AggregateRef;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn, Instrument};

/// Predicate deciding whether a trigger event is processed.
pub type EventFilter<S, I> = Arc<dyn Fn(&StoredEvent<GalleryEvent<S, I>>) -> bool + Send + Sync>;

type TriggerBus<S, I> = dyn EventBus<Event = GalleryEvent<S, I>>;

/// Options of a dispatcher run.
#[derive(Clone)]
pub struct RunOptions<S, I> {
    /// Worker pool and output settings.
    pub config: DispatcherConfig,
    filters: Vec<EventFilter<S, I>>,
}

impl<S, I> Default for RunOptions<S, I> {
    fn default() -> Self {
        Self::new(DispatcherConfig::default())
    }
}

impl<S, I> std::fmt::Debug for RunOptions<S, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("config", &self.config)
            .field("filters", &self.filters.len())
            .finish()
    }
}

impl<S, I> RunOptions<S, I> {
    /// Creates options without filters.
    pub const fn new(config: DispatcherConfig) -> Self {
        Self {
            config,
            filters: Vec::new(),
        }
    }

    /// Adds a filter. An event is processed only if every filter accepts it.
    #[must_use]
    pub fn filter_events<F>(mut self, filter: F) -> Self
    where
        F: Fn(&StoredEvent<GalleryEvent<S, I>>) -> bool + Send + Sync + 'static,
    {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Only processes events of aggregates with one of the given names.
    #[must_use]
    pub fn filter_aggregates<N: Into<String>>(self, names: impl IntoIterator<Item = N>) -> Self {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        self.filter_events(move |event| names.contains(&event.aggregate.name))
    }

    fn accepts(&self, event: &StoredEvent<GalleryEvent<S, I>>) -> bool {
        self.filters.iter().all(|filter| filter(event))
    }
}

/// The channels and task of a running dispatcher.
///
/// Both channels close once every worker has stopped. Callers should drain
/// both; a full channel blocks its worker until the run is cancelled.
#[derive(Debug)]
pub struct DispatcherHandle<S, I> {
    /// Results of processed stacks.
    pub results: mpsc::Receiver<ProcessorResult<S, I>>,
    /// One error per failed event, plus forwarded subscription errors.
    pub errors: mpsc::Receiver<DispatchError>,
    /// The task driving the workers. Completes after they have stopped.
    pub task: JoinHandle<()>,
}

/// Runs a [`Processor`] whenever a stack is added to a gallery.
pub struct PostProcessor<G, S, I> {
    processor: Processor<I>,
    bus: Arc<TriggerBus<S, I>>,
    fetcher: Arc<dyn GalleryFetcher<G>>,
    pipeline: Arc<dyn Pipeline>,
    auto_apply: bool,
    saver: Option<Arc<dyn GallerySaver<G>>>,
    clear_stack: bool,
}

impl<G, S, I> Clone for PostProcessor<G, S, I> {
    fn clone(&self) -> Self {
        Self {
            processor: self.processor.clone(),
            bus: Arc::clone(&self.bus),
            fetcher: Arc::clone(&self.fetcher),
            pipeline: Arc::clone(&self.pipeline),
            auto_apply: self.auto_apply,
            saver: self.saver.clone(),
            clear_stack: self.clear_stack,
        }
    }
}

impl<G, S, I> std::fmt::Debug for PostProcessor<G, S, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostProcessor")
            .field("processor", &self.processor)
            .field("auto_apply", &self.auto_apply)
            .field("auto_save", &self.saver.is_some())
            .field("clear_stack", &self.clear_stack)
            .finish_non_exhaustive()
    }
}

impl<G, S, I> PostProcessor<G, S, I>
where
    G: ProcessableGallery<S, I> + Sync + 'static,
    S: Id,
    I: Id,
{
    /// Creates a post-processor that only publishes results.
    pub fn new<B, F, P>(processor: Processor<I>, bus: Arc<B>, fetcher: F, pipeline: P) -> Self
    where
        B: EventBus<Event = GalleryEvent<S, I>> + 'static,
        F: GalleryFetcher<G> + 'static,
        P: Pipeline + 'static,
    {
        Self {
            processor,
            bus,
            fetcher: Arc::new(fetcher),
            pipeline: Arc::new(pipeline),
            auto_apply: false,
            saver: None,
            clear_stack: false,
        }
    }

    /// Applies every result to a freshly fetched gallery without saving it.
    #[must_use]
    pub fn with_auto_apply(mut self) -> Self {
        self.auto_apply = true;
        self.saver = None;
        self
    }

    /// Applies every result to a freshly fetched gallery and saves it with
    /// `saver`, retrying on concurrency conflicts.
    #[must_use]
    pub fn with_auto_save<V>(mut self, saver: V) -> Self
    where
        V: GallerySaver<G> + 'static,
    {
        self.auto_apply = true;
        self.saver = Some(Arc::new(saver));
        self
    }

    /// Clears the stack's non-original variants before applying results.
    #[must_use]
    pub const fn with_clear_stack(mut self, clear: bool) -> Self {
        self.clear_stack = clear;
        self
    }

    /// Starts processing trigger events until the subscription ends or
    /// `cancel` fires.
    ///
    /// Fails only if subscribing fails.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        options: RunOptions<S, I>,
    ) -> Result<DispatcherHandle<S, I>, DispatchError> {
        let workers: usize = options.config.workers.into();
        let capacity: usize = options.config.queue_capacity.into();
        info!(
            workers,
            discard_results = options.config.discard_results,
            triggers = ?EventKind::PROCESSOR_TRIGGERS,
            "starting post-processor"
        );

        let subscription = self
            .bus
            .subscribe(EventKind::PROCESSOR_TRIGGERS)
            .await
            .map_err(DispatchError::Subscribe)?;

        let (results_tx, results) = mpsc::channel(capacity);
        let (errors_tx, errors) = mpsc::channel(capacity);

        let forward_cancel = cancel.child_token();
        let forwarder = tokio::spawn(forward_errors(
            subscription.errors,
            errors_tx.clone(),
            forward_cancel.clone(),
        ));

        let worker = Arc::new(Worker {
            post: self.clone(),
            options,
            results: results_tx,
            errors: errors_tx,
            cancel,
        });
        let events = subscription.events;

        let task = tokio::spawn(async move {
            let handles: Vec<_> = (0..workers)
                .map(|index| {
                    let worker = Arc::clone(&worker);
                    let events = events.clone();
                    tokio::spawn(
                        async move { worker.work(events).await }
                            .instrument(tracing::debug_span!("worker", index)),
                    )
                })
                .collect();
            drop(worker);
            drop(events);

            for joined in join_all(handles).await {
                if let Err(err) = joined {
                    warn!(%err, "post-processing worker stopped abnormally");
                }
            }

            forward_cancel.cancel();
            if let Err(err) = forwarder.await {
                warn!(%err, "subscription error forwarder stopped abnormally");
            }
            info!("post-processor stopped");
        });

        Ok(DispatcherHandle {
            results,
            errors,
            task,
        })
    }
}

async fn forward_errors(
    errors: async_channel::Receiver<crate::errors::EventStoreError>,
    out: mpsc::Sender<DispatchError>,
    cancel: CancellationToken,
) {
    loop {
        let err = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            err = errors.recv() => match err {
                Ok(err) => err,
                Err(_) => return,
            },
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            sent = out.send(DispatchError::Subscription(err)) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

struct Worker<G, S, I> {
    post: PostProcessor<G, S, I>,
    options: RunOptions<S, I>,
    results: mpsc::Sender<ProcessorResult<S, I>>,
    errors: mpsc::Sender<DispatchError>,
    cancel: CancellationToken,
}

impl<G, S, I> Worker<G, S, I>
where
    G: ProcessableGallery<S, I> + Sync + 'static,
    S: Id,
    I: Id,
{
    async fn work(&self, events: async_channel::Receiver<StoredEvent<GalleryEvent<S, I>>>) {
        loop {
            let event = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => event,
                    Err(_) => break,
                },
            };
            self.handle(event).await;
        }
        debug!("worker stopped");
    }

    #[instrument(
        skip_all,
        fields(aggregate = %event.aggregate, event = %event.payload.event_kind())
    )]
    async fn handle(&self, event: StoredEvent<GalleryEvent<S, I>>) {
        if !self.options.accepts(&event) {
            debug!("event rejected by filter");
            return;
        }

        let start = Instant::now();
        let processed = match &event.payload {
            GalleryEvent::StackAdded { stack } => {
                self.stack_added(&event.aggregate, &stack.id).await
            }
            _ => {
                debug!("not a trigger event");
                return;
            }
        };
        let mut result = match processed {
            Ok(result) => result,
            Err(err) => return self.fail(err).await,
        };
        result.trigger = Some(event);
        result.runtime = start.elapsed();

        if self.post.auto_apply {
            if let Err(err) = self.apply(&mut result).await {
                return self.fail(err).await;
            }
        }

        if self.options.config.discard_results {
            debug!(stack = %result.stack_id, "discarding result");
            return;
        }

        result.runtime = start.elapsed();
        self.push(result).await;
    }

    async fn fetch(&self, aggregate: &AggregateRef) -> Result<G, DispatchError> {
        self.post
            .fetcher
            .fetch(aggregate)
            .await
            .map_err(|source| DispatchError::Fetch {
                aggregate: aggregate.clone(),
                source,
            })
    }

    async fn stack_added(
        &self,
        aggregate: &AggregateRef,
        stack_id: &S,
    ) -> Result<ProcessorResult<S, I>, DispatchError> {
        let process_error = |source: ProcessorError| DispatchError::Process {
            aggregate: aggregate.clone(),
            stack: stack_id.to_string(),
            source,
        };

        let gallery = self.fetch(aggregate).await?;
        if gallery.stack(stack_id).is_none() {
            return Err(process_error(
                crate::errors::GalleryError::stack_not_found(stack_id).into(),
            ));
        }

        debug!(stack = %stack_id, "running processor");
        self.post
            .processor
            .process(self.post.pipeline.as_ref(), &gallery, stack_id)
            .await
            .map_err(process_error)
    }

    /// Fetch, apply and save until the save goes through, a non-conflict
    /// error occurs or `max_save_attempts` is reached.
    async fn apply(&self, result: &mut ProcessorResult<S, I>) -> Result<(), DispatchError> {
        let aggregate = result.gallery.clone();
        let max_attempts: u32 = self.options.config.max_save_attempts.into();
        let options = ApplyOptions {
            clear_stack: self.post.clear_stack,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;

            debug!(attempt, "fetching gallery to apply result");
            let mut gallery = self.fetch(&aggregate).await?;
            result
                .apply(&mut gallery, options)
                .map_err(|source| DispatchError::Apply {
                    aggregate: aggregate.clone(),
                    source,
                })?;
            result.applied = true;

            let Some(saver) = &self.post.saver else {
                return Ok(());
            };

            match saver.save(&mut gallery).await {
                Ok(()) => {
                    result.saved = true;
                    return Ok(());
                }
                Err(err) if err.is_concurrency_conflict() => {
                    if attempt >= max_attempts {
                        return Err(DispatchError::ConcurrencyRetriesExhausted {
                            aggregate,
                            attempts: attempt,
                            last: err,
                        });
                    }
                    debug!(attempt, %err, "concurrency conflict on auto-save, retrying");
                }
                Err(source) => return Err(DispatchError::Save { aggregate, source }),
            }
        }
    }

    async fn push(&self, result: ProcessorResult<S, I>) {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => debug!("cancelled, dropping result"),
            sent = self.results.send(result) => {
                if sent.is_err() {
                    debug!("results receiver dropped");
                }
            }
        }
    }

    async fn fail(&self, err: DispatchError) {
        warn!(%err, "post-processing failed");
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => debug!("cancelled, dropping error"),
            sent = self.errors.send(err) => {
                if sent.is_err() {
                    debug!("errors receiver dropped");
                }
            }
        }
    }
}
