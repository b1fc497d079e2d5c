//! Live query engine: turns a read-model query into a continuously refreshed
//! stream of mapped values.
//!
//! Queries are cold. Nothing is fetched until [`LiveQuery::subscribe`] is
//! called, and each subscription drives its own refresh loop until the
//! returned [`LiveStream`] is dropped, the context is disposed, or a terminal
//! error is emitted.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::domain::{AppError, Cardinality, FetchError, Mapper, QueryDescriptor, Trigger};

use super::block_watcher::BlockSubscription;
use super::context::Context;

const STREAM_BUFFER: usize = 4;

struct QuerySource<O> {
    query: String,
    variables: Value,
    trigger: Option<Trigger>,
    project: Mapper<O>,
}

/// A cold, re-subscribable query.
pub struct LiveQuery<O> {
    ctx: Context,
    source: Arc<QuerySource<O>>,
    subscribers: Arc<AtomicUsize>,
}

impl<O> Clone for LiveQuery<O> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            source: Arc::clone(&self.source),
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<O> LiveQuery<O>
where
    O: PartialEq + Clone + Send + Sync + 'static,
{
    fn new(ctx: &Context, query: String, variables: Value, trigger: Option<Trigger>, project: Mapper<O>) -> Self {
        Self {
            ctx: ctx.clone(),
            source: Arc::new(QuerySource {
                query,
                variables,
                trigger,
                project,
            }),
            subscribers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn query(&self) -> &str {
        &self.source.query
    }

    /// Number of live subscriptions to this query.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::Acquire)
    }

    /// Starts a new, independent subscription.
    ///
    /// The query is issued immediately and then again on every trigger tick.
    pub fn subscribe(&self) -> Result<LiveStream<O>, AppError> {
        self.ctx.ensure_connected()?;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let guard = SubscriberGuard::new(Arc::clone(&self.subscribers));
        tokio::spawn(drive(self.ctx.clone(), Arc::clone(&self.source), tx, guard));
        Ok(LiveStream {
            rx,
            query: self.source.query.clone(),
        })
    }

    /// Subscribes, waits for the first emission and unsubscribes.
    pub async fn first(&self) -> Result<O, AppError> {
        self.subscribe()?.first().await
    }
}

struct SubscriberGuard(Arc<AtomicUsize>);

impl SubscriberGuard {
    fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        metrics::gauge!("live_query_subscribers").increment(1.0);
        Self(count)
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
        metrics::gauge!("live_query_subscribers").decrement(1.0);
    }
}

/// One subscription's sequence of values.
///
/// Yields `Ok` values that each differ from the previous one, and at most one
/// terminal `Err` after which the stream ends. Dropping it unsubscribes.
pub struct LiveStream<O> {
    rx: mpsc::Receiver<Result<O, AppError>>,
    query: String,
}

impl<O> LiveStream<O> {
    /// The first emission.
    pub async fn first(mut self) -> Result<O, AppError> {
        match self.next().await {
            Some(item) => item,
            None => Err(AppError::NotConnected),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Explicit unsubscription; equivalent to dropping the stream.
    pub fn unsubscribe(self) {}
}

impl<O> Stream for LiveStream<O> {
    type Item = Result<O, AppError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

enum Ticker {
    Interval(Duration),
    Blocks(BlockSubscription),
    Idle,
}

impl Ticker {
    fn new(ctx: &Context, trigger: Option<Trigger>) -> Self {
        match trigger.unwrap_or(Trigger::Interval(ctx.config().poll_interval)) {
            Trigger::Interval(period) => Ticker::Interval(period),
            Trigger::NewBlock => Ticker::Blocks(ctx.subscribe_blocks()),
            Trigger::Invalidation => Ticker::Idle,
        }
    }

    async fn tick(&mut self) {
        match self {
            Ticker::Interval(period) => tokio::time::sleep(*period).await,
            Ticker::Blocks(sub) => {
                if !sub.changed().await {
                    futures::future::pending::<()>().await;
                }
            }
            Ticker::Idle => futures::future::pending::<()>().await,
        }
    }

    /// Drops ticks that arrived while a refresh was in flight.
    fn coalesce(&mut self) {
        if let Ticker::Blocks(sub) = self {
            sub.mark_seen();
        }
    }
}

async fn drive<O>(
    ctx: Context,
    source: Arc<QuerySource<O>>,
    tx: mpsc::Sender<Result<O, AppError>>,
    _guard: SubscriberGuard,
) where
    O: PartialEq + Clone + Send + Sync + 'static,
{
    let mut shutdown = ctx.subscribe_shutdown();
    let mut invalidation = ctx.subscribe_invalidation();
    let mut ticker = Ticker::new(&ctx, source.trigger);
    let mut last: Option<O> = None;

    loop {
        if *shutdown.borrow() {
            debug!(query = %source.query, "Context disposed, ending live stream");
            break;
        }

        // A fetch still in flight at disposal or unsubscribe is abandoned.
        let outcome = tokio::select! {
            outcome = refresh(&ctx, &source) => outcome,
            _ = shutdown.wait_for(|disposed| *disposed) => break,
            _ = tx.closed() => break,
        };
        if *shutdown.borrow() {
            break;
        }

        match outcome {
            Ok(value) => {
                if last.as_ref() == Some(&value) {
                    debug!(query = %source.query, "Result unchanged, suppressing emission");
                } else {
                    if tx.send(Ok(value.clone())).await.is_err() {
                        break;
                    }
                    last = Some(value);
                }
            }
            Err(e) if e.is_transient() => {
                metrics::counter!("live_query_fetch_errors_total").increment(1);
                warn!(query = %source.query, error = %e, "Read model fetch failed, retrying on next tick");
            }
            Err(e) => {
                warn!(query = %source.query, error = %e, "Live stream terminated");
                let _ = tx.send(Err(e)).await;
                break;
            }
        }

        ticker.coalesce();
        invalidation.borrow_and_update();

        tokio::select! {
            _ = tx.closed() => break,
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            result = invalidation.changed() => {
                if result.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {}
        }
    }
}

#[instrument(skip_all, fields(query = %source.query))]
async fn refresh<O>(ctx: &Context, source: &QuerySource<O>) -> Result<O, AppError> {
    metrics::counter!("live_query_refreshes_total").increment(1);
    let data = ctx.read_model().query(&source.query, &source.variables).await?;
    let root = root_field(data)?;
    (source.project)(root)
}

/// The value of the response's single root field; `Null` when absent.
fn root_field(data: Value) -> Result<Value, AppError> {
    match data {
        Value::Object(map) => Ok(map.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null)),
        Value::Null => Ok(Value::Null),
        other => Err(FetchError::Decode(format!("expected an object under 'data', got {other}")).into()),
    }
}

fn check_cardinality<T>(descriptor: &QueryDescriptor<T>, expected: Cardinality) -> Result<(), AppError> {
    if descriptor.cardinality() != expected {
        return Err(AppError::Internal(format!(
            "descriptor for '{}' is {:?}, expected {:?}",
            descriptor.query(),
            descriptor.cardinality(),
            expected
        )));
    }
    Ok(())
}

impl Context {
    /// Observes a single record, mapped through the descriptor's mapper.
    ///
    /// When nothing matches, the mapper receives `Value::Null`; returning
    /// `AppError::NotFound` from it ends the stream with that error.
    pub fn observe_object<T>(&self, descriptor: QueryDescriptor<T>) -> Result<LiveQuery<T>, AppError>
    where
        T: PartialEq + Clone + Send + Sync + 'static,
    {
        self.ensure_connected()?;
        check_cardinality(&descriptor, Cardinality::Single)?;
        let trigger = descriptor.trigger();
        let (query, variables) = (descriptor.query().to_string(), descriptor.variables().clone());
        let project: Mapper<T> = Arc::new(move |root: Value| descriptor.map(root));
        Ok(LiveQuery::new(self, query, variables, trigger, project))
    }

    /// Observes a list, mapping each item and preserving result order.
    pub fn observe_list<T>(&self, descriptor: QueryDescriptor<T>) -> Result<LiveQuery<Vec<T>>, AppError>
    where
        T: PartialEq + Clone + Send + Sync + 'static,
    {
        self.ensure_connected()?;
        check_cardinality(&descriptor, Cardinality::List)?;
        let trigger = descriptor.trigger();
        let (query, variables) = (descriptor.query().to_string(), descriptor.variables().clone());
        let project: Mapper<Vec<T>> = Arc::new(move |root: Value| match root {
            Value::Array(items) => items.into_iter().map(|item| descriptor.map(item)).collect(),
            Value::Null => Ok(Vec::new()),
            other => Err(AppError::Mapping(format!(
                "expected a list from '{}', got {other}",
                descriptor.query()
            ))),
        });
        Ok(LiveQuery::new(self, query, variables, trigger, project))
    }

    /// Observes the raw root value of a query without mapping.
    pub fn observe_raw(
        &self,
        query: impl Into<String>,
        variables: Value,
        trigger: Option<Trigger>,
    ) -> Result<LiveQuery<Value>, AppError> {
        self.ensure_connected()?;
        let project: Mapper<Value> = Arc::new(|root: Value| Ok::<_, AppError>(root));
        Ok(LiveQuery::new(self, query.into(), variables, trigger, project))
    }
}
