//! The fetch orchestrator.
//!
//! `Xget` wires the probe, the middleware registry, the per-segment sources
//! and transform chains, the reassembly pool, and the hasher tap into one
//! pull-based output stream. A background driver task owns the probe and
//! middleware phases; the output stream itself runs the ordered merge, so
//! segment dispatch cannot begin before both the probe has completed and
//! the consumer has pulled once.

use std::{
    any::Any,
    pin::Pin,
    sync::{Arc, Mutex, OnceLock},
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;
use xget_events::{EventBus, XgetEvent};
use xget_net::{HttpClient, NetOptions};

use crate::{
    assembly::{AssemblyPool, PoolConfig, PoolMetrics},
    error::{BoxError, XgetError, XgetResult},
    hash::HasherTap,
    options::Options,
    pipeline::{Chain, SegmentMeta, Transform, TransformFactory},
    probe::{build_load_data, probe_with_retry, HeadHandler, HeadInfo, LoadData},
    source::{segment_stream, SegmentConfig},
    store::Store,
};

/// Lifecycle of a fetch instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Constructed,
    Probing,
    Loaded,
    Running,
    Ended,
    Errored,
    Destroyed,
}

impl Lifecycle {
    fn is_loaded(self) -> bool {
        !matches!(self, Self::Constructed | Self::Probing)
    }

    fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Errored | Self::Destroyed)
    }
}

/// `with` middleware: computes one store value from the load data.
pub type WithFactory =
    Arc<dyn Fn(&LoadData) -> Result<Box<dyn Any + Send + Sync>, BoxError> + Send + Sync>;

/// Registrations collected before the probe completes.
#[derive(Default)]
struct Registry {
    transformers: Vec<(String, TransformFactory)>,
    middlewares: Vec<(String, WithFactory)>,
    head_handler: Option<HeadHandler>,
}

/// Everything handed from the driver to the merging output stream.
struct Wiring {
    load: LoadData,
    store: Arc<Store>,
    transformers: Vec<(String, TransformFactory)>,
}

struct Shared {
    url: Url,
    opts: Options,
    client: HttpClient,
    bus: EventBus,
    cancel: CancellationToken,
    state: Mutex<Lifecycle>,
    registry: Mutex<Registry>,
    load: OnceLock<LoadData>,
    store: OnceLock<Arc<Store>>,
    pool: OnceLock<Arc<AssemblyPool>>,
    hasher: Mutex<Option<HasherTap>>,
    terminal_error: Mutex<Option<XgetError>>,
    /// Destroy requested before `Loaded`; executed right after it fires.
    deferred_destroy: Mutex<Option<Option<XgetError>>>,
    start_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl Shared {
    fn state(&self) -> Lifecycle {
        *self.state.lock().expect("state mutex poisoned")
    }

    fn set_state(&self, next: Lifecycle) {
        *self.state.lock().expect("state mutex poisoned") = next;
    }

    /// Terminal failure: record, announce, tear everything down.
    fn fail(&self, err: XgetError) {
        warn!(error = %err, "fetch failed");
        self.bus.publish(XgetEvent::Error {
            error: err.to_string(),
        });
        *self
            .terminal_error
            .lock()
            .expect("terminal_error mutex poisoned") = Some(err);
        self.set_state(Lifecycle::Errored);
        self.teardown();
    }

    fn do_destroy(&self, reason: Option<XgetError>) {
        if let Some(err) = reason {
            self.bus.publish(XgetEvent::Error {
                error: err.to_string(),
            });
            *self
                .terminal_error
                .lock()
                .expect("terminal_error mutex poisoned") = Some(err);
        }
        self.set_state(Lifecycle::Destroyed);
        self.teardown();
    }

    fn teardown(&self) {
        self.cancel.cancel();
        if let Some(pool) = self.pool.get() {
            pool.close();
        }
    }

    /// The driver was cancelled before `Loaded`. A pre-load destroy left
    /// its reason behind; finalize with it. Plain drops leave nothing.
    fn finish_cancelled(&self) {
        let deferred = self
            .deferred_destroy
            .lock()
            .expect("deferred_destroy poisoned")
            .take();
        if let Some(reason) = deferred {
            debug!("probe aborted by destroy");
            self.do_destroy(reason);
        }
    }
}

/// Convenience constructor: `xget(url, opts)`.
pub fn xget(url: &str, opts: Options) -> XgetResult<Xget> {
    Xget::new(url, opts)
}

/// A chunked HTTP fetch.
///
/// Implements `Stream<Item = XgetResult<Bytes>>`: poll it (within a Tokio
/// runtime) to receive the reassembled content in order. Lifecycle events
/// are available through [`Xget::events`].
pub struct Xget {
    shared: Arc<Shared>,
    output: Pin<Box<dyn Stream<Item = XgetResult<Bytes>> + Send>>,
}

impl Xget {
    pub fn new(url: &str, opts: Options) -> XgetResult<Self> {
        opts.validate()?;
        let hash_algo = opts.hash_algo()?;
        if opts.cache {
            AssemblyPool::validate_capacity(opts.cache_size, opts.nowarn)?;
        }
        let url: Url = url.parse()?;

        let net = NetOptions {
            idle_timeout: opts.timeout,
            ..opts.net.clone()
        };
        let client = HttpClient::new(net)?;
        let bus = EventBus::new(opts.event_channel_capacity);

        let (start_tx, start_rx) = oneshot::channel();
        let (wiring_tx, wiring_rx) = oneshot::channel();

        let shared = Arc::new(Shared {
            url,
            opts,
            client,
            bus,
            cancel: CancellationToken::new(),
            state: Mutex::new(Lifecycle::Constructed),
            registry: Mutex::new(Registry::default()),
            load: OnceLock::new(),
            store: OnceLock::new(),
            pool: OnceLock::new(),
            hasher: Mutex::new(hash_algo.map(HasherTap::new)),
            terminal_error: Mutex::new(None),
            deferred_destroy: Mutex::new(None),
            start_tx: Mutex::new(Some(start_tx)),
        });

        tokio::spawn(drive(shared.clone(), start_rx, wiring_tx));

        if shared.opts.auto {
            let tx = shared
                .start_tx
                .lock()
                .expect("start mutex poisoned")
                .take()
                .expect("start signal present at construction");
            let _ = tx.send(());
        }

        let output = Box::pin(merge_output(shared.clone(), wiring_rx));
        Ok(Self { shared, output })
    }

    /// Begin probing when constructed with `auto: false`.
    ///
    /// Returns false when probing has already started (including the `auto`
    /// case) or the instance is beyond that point.
    pub fn start(&self) -> bool {
        match self
            .shared
            .start_tx
            .lock()
            .expect("start mutex poisoned")
            .take()
        {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Register a per-segment transformer factory under `tag`.
    ///
    /// Factories run once per segment, in registration order; the last
    /// transformer feeds the reassembly slot. Rejected once loaded.
    pub fn use_transform<F>(&self, tag: impl Into<String>, factory: F) -> XgetResult<()>
    where
        F: Fn(&SegmentMeta, &Arc<Store>) -> Result<Box<dyn Transform>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        let mut reg = self.shared.registry.lock().expect("registry poisoned");
        if self.shared.state().is_loaded() {
            return Err(XgetError::AlreadyLoaded);
        }
        reg.transformers.push((tag.into(), Arc::new(factory)));
        Ok(())
    }

    /// Register a `with` middleware computing a store value under `tag`.
    ///
    /// Middlewares run once, in registration order, right after `Loaded`.
    /// Rejected once loaded.
    pub fn with_middleware<F>(&self, tag: impl Into<String>, middleware: F) -> XgetResult<()>
    where
        F: Fn(&LoadData) -> Result<Box<dyn Any + Send + Sync>, BoxError> + Send + Sync + 'static,
    {
        let mut reg = self.shared.registry.lock().expect("registry poisoned");
        if self.shared.state().is_loaded() {
            return Err(XgetError::AlreadyLoaded);
        }
        reg.middlewares.push((tag.into(), Arc::new(middleware)));
        Ok(())
    }

    /// Replace the probe interceptor. Returns false when the probe result
    /// has already been consumed.
    pub fn set_head_handler<F>(&self, handler: F) -> bool
    where
        F: Fn(&HeadInfo) -> Option<u64> + Send + Sync + 'static,
    {
        let mut reg = self.shared.registry.lock().expect("registry poisoned");
        if self.shared.state().is_loaded() {
            return false;
        }
        reg.head_handler = Some(Box::new(handler));
        true
    }

    /// Digest of the bytes emitted so far (or the final digest after the
    /// stream ends), as raw bytes. `None` when no hash was configured.
    pub fn hash_snapshot(&self) -> Option<Vec<u8>> {
        self.shared
            .hasher
            .lock()
            .expect("hasher poisoned")
            .as_ref()
            .map(HasherTap::snapshot)
    }

    /// Like [`Xget::hash_snapshot`], hex-encoded.
    pub fn hash_snapshot_hex(&self) -> Option<String> {
        self.shared
            .hasher
            .lock()
            .expect("hasher poisoned")
            .as_ref()
            .map(HasherTap::snapshot_hex)
    }

    /// Resize the reassembly capacity.
    ///
    /// Before the pool exists this only validates; the pool is created with
    /// the configured capacity when segments dispatch.
    pub fn set_cache_size(&self, bytes: u64) -> XgetResult<()> {
        match self.shared.pool.get() {
            Some(pool) => pool.set_capacity(bytes),
            None => AssemblyPool::validate_capacity(bytes, self.shared.opts.nowarn),
        }
    }

    /// Extract the `{tag, source}` blame annotation from an error raised
    /// inside user middleware.
    pub fn err_context(err: &XgetError) -> Option<crate::error::ErrContext<'_>> {
        err.err_context()
    }

    /// Subscribe to lifecycle events.
    pub fn events(&self) -> tokio::sync::broadcast::Receiver<XgetEvent> {
        self.shared.bus.subscribe()
    }

    pub fn state(&self) -> Lifecycle {
        self.shared.state()
    }

    /// Probe result, available once `Loaded` has fired.
    pub fn load_data(&self) -> Option<&LoadData> {
        self.shared.load.get()
    }

    /// The middleware store, available once `StoreReady` has fired.
    pub fn store(&self) -> Option<Arc<Store>> {
        self.shared.store.get().cloned()
    }

    /// Reassembly pool usage statistics, once segments have dispatched.
    pub fn metrics(&self) -> Option<PoolMetrics> {
        self.shared.pool.get().map(|p| p.metrics())
    }

    /// Abort the fetch. With a cause, `Error` fires and the output stream
    /// yields it; without, the fetch ends silently.
    ///
    /// Called before `Loaded`, the in-flight probe socket is aborted
    /// immediately; the instance finalizes as `Destroyed` without `Loaded`
    /// or `End` firing.
    pub fn destroy(&self, reason: Option<XgetError>) {
        if self.shared.state().is_loaded() {
            self.shared.do_destroy(reason);
        } else {
            debug!("destroy before load, aborting probe");
            *self
                .shared
                .deferred_destroy
                .lock()
                .expect("deferred_destroy poisoned") = Some(reason);
            // The driver's selects observe this and finalize the destroy.
            self.shared.cancel.cancel();
        }
    }

    /// Drive the whole fetch into an async writer; resolves with the byte
    /// count on success.
    pub async fn pipe<W>(&mut self, mut sink: W) -> XgetResult<u64>
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        use tokio::io::AsyncWriteExt;
        let mut written: u64 = 0;
        while let Some(item) = self.next().await {
            let chunk = item?;
            sink.write_all(&chunk).await.map_err(XgetError::Sink)?;
            written += chunk.len() as u64;
        }
        sink.flush().await.map_err(XgetError::Sink)?;
        Ok(written)
    }
}

impl Stream for Xget {
    type Item = XgetResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.output.as_mut().poll_next(cx)
    }
}

impl Drop for Xget {
    fn drop(&mut self) {
        // Best-effort: unblock every task this instance spawned.
        self.shared.teardown();
    }
}

/// Probe-and-middleware phase, run in a background task.
async fn drive(shared: Arc<Shared>, start_rx: oneshot::Receiver<()>, wiring_tx: oneshot::Sender<Wiring>) {
    tokio::select! {
        biased;
        () = shared.cancel.cancelled() => {
            shared.finish_cancelled();
            return;
        }
        started = start_rx => {
            if started.is_err() {
                return;
            }
        }
    }

    shared.set_state(Lifecycle::Probing);

    let outcome = tokio::select! {
        biased;
        () = shared.cancel.cancelled() => {
            shared.finish_cancelled();
            return;
        }
        r = probe_with_retry(
            &shared.client,
            &shared.url,
            shared.opts.headers.as_ref(),
            shared.opts.retries,
            &shared.bus,
        ) => match r {
            Ok(o) => o,
            Err(e) => {
                shared.fail(e);
                return;
            }
        },
    };

    // Snapshot the registry; `Loaded` is flipped under the registry lock so
    // a racing registration either lands in the snapshot or gets rejected.
    let (transformers, middlewares, head_handler) = {
        let mut reg = shared.registry.lock().expect("registry poisoned");
        shared.set_state(Lifecycle::Loaded);
        (
            reg.transformers.clone(),
            reg.middlewares.clone(),
            reg.head_handler.take(),
        )
    };

    let head_override = head_handler.as_ref().and_then(|handler| {
        handler(&HeadInfo {
            chunks: shared.opts.chunks,
            headers: outcome.headers.clone(),
            total_size: outcome.total_size,
            accepts_ranges: outcome.accepts_ranges,
        })
    });

    let load = match build_load_data(
        shared.url.clone(),
        outcome,
        shared.opts.start,
        shared.opts.size,
        shared.opts.chunks,
        head_override,
    ) {
        Ok(load) => load,
        Err(e) => {
            shared.fail(e);
            return;
        }
    };

    let _ = shared.load.set(load.clone());
    shared.bus.publish(XgetEvent::Loaded {
        total_size: load.total_size,
        start: load.start,
        chunkable: load.chunkable,
        chunks: load.plan.len(),
    });

    let mut store = Store::new();
    for (tag, middleware) in &middlewares {
        match middleware(&load) {
            Ok(value) => store.insert(tag.clone(), value),
            Err(source) => {
                shared.fail(XgetError::Middleware {
                    tag: tag.clone(),
                    source,
                });
                return;
            }
        }
    }
    let store = Arc::new(store);
    let _ = shared.store.set(store.clone());
    shared.bus.publish(XgetEvent::StoreReady);

    if let Some(reason) = shared
        .deferred_destroy
        .lock()
        .expect("deferred_destroy poisoned")
        .take()
    {
        debug!("executing deferred destroy");
        shared.do_destroy(reason);
        return;
    }

    if load.plan.is_empty() {
        // Zero bytes to fetch: terminate immediately, no segments.
        debug!("empty plan, ending immediately");
        shared.set_state(Lifecycle::Ended);
        shared.bus.publish(XgetEvent::End);
        return;
    }

    // Hand off to the output stream; dropped receiver means the consumer is
    // already gone.
    let _ = wiring_tx.send(Wiring {
        load,
        store,
        transformers,
    });
}

/// The pull-based output: waits for wiring, dispatches segments, merges
/// slots in index order through the hasher tap.
fn merge_output(
    shared: Arc<Shared>,
    wiring_rx: oneshot::Receiver<Wiring>,
) -> impl Stream<Item = XgetResult<Bytes>> + Send {
    async_stream::stream! {
        // First poll parks on the wiring hand-off: this is the "requested"
        // gate. The driver drops the sender on probe failure, empty plans,
        // and destroyed instances.
        if let Ok(Wiring { load, store, transformers }) = wiring_rx.await {
            // A destroy may have slipped in between the driver's deferred
            // check and this hand-off.
            let deferred = shared
                .deferred_destroy
                .lock()
                .expect("deferred_destroy poisoned")
                .take();
            if let Some(reason) = deferred {
                shared.do_destroy(reason);
            } else {
                shared.set_state(Lifecycle::Running);

                let capacity = if shared.opts.cache {
                    shared.opts.cache_size
                } else {
                    0
                };
                let pool = Arc::new(AssemblyPool::new(
                    load.plan.len(),
                    PoolConfig {
                        max_capacity: capacity,
                        reallocate: shared.opts.reallocate,
                        nowarn: shared.opts.nowarn,
                    },
                ));
                let _ = shared.pool.set(pool.clone());

                let (err_tx, mut err_rx) = mpsc::channel::<XgetError>(load.plan.len());
                for (index, range) in load.plan.iter().enumerate() {
                    let cfg = SegmentConfig {
                        index,
                        range: *range,
                        max_retries: shared.opts.retries,
                        accepts_ranges: load.chunkable,
                    };
                    tokio::spawn(run_segment(
                        shared.clone(),
                        cfg,
                        transformers.clone(),
                        store.clone(),
                        pool.clone(),
                        err_tx.clone(),
                    ));
                }
                drop(err_tx);

                let mut interrupted = false;
                'slots: for slot in 0..load.plan.len() {
                    loop {
                        let chunk = tokio::select! {
                            biased;
                            () = shared.cancel.cancelled() => {
                                shared.finish_cancelled();
                                interrupted = true;
                                break 'slots;
                            }
                            Some(err) = err_rx.recv() => {
                                shared.fail(err);
                                interrupted = true;
                                break 'slots;
                            }
                            chunk = pool.read(slot) => chunk,
                        };
                        match chunk {
                            Some(chunk) => {
                                if let Some(hasher) = shared
                                    .hasher
                                    .lock()
                                    .expect("hasher poisoned")
                                    .as_mut()
                                {
                                    hasher.update(&chunk);
                                }
                                yield Ok(chunk);
                            }
                            None => break,
                        }
                    }
                }

                if !interrupted && !shared.state().is_terminal() {
                    debug!("all segments drained");
                    shared.set_state(Lifecycle::Ended);
                    shared.bus.publish(XgetEvent::End);
                }
            }
        }

        let terminal_err = shared
            .terminal_error
            .lock()
            .expect("terminal_error poisoned")
            .take();
        if let Some(err) = terminal_err {
            yield Err(err);
        }
    }
}

/// One segment: resilient source → transform chain → pool slot.
async fn run_segment(
    shared: Arc<Shared>,
    cfg: SegmentConfig,
    transformers: Vec<(String, TransformFactory)>,
    store: Arc<Store>,
    pool: Arc<AssemblyPool>,
    err_tx: mpsc::Sender<XgetError>,
) {
    let index = cfg.index;
    let meta = SegmentMeta {
        index,
        range: cfg.range,
    };

    let mut chain = match Chain::build(&transformers, &meta, &store) {
        Ok(chain) => chain,
        Err(e) => {
            let _ = err_tx.send(e).await;
            return;
        }
    };

    let stream = segment_stream(
        shared.client.clone(),
        shared.url.clone(),
        shared.opts.headers.clone(),
        cfg,
        shared.bus.clone(),
        shared.cancel.clone(),
    );
    futures::pin_mut!(stream);

    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => {
                let produced = match chain.update(chunk) {
                    Ok(p) => p,
                    Err(e) => {
                        let _ = err_tx.send(e).await;
                        return;
                    }
                };
                for out in produced {
                    pool.write(index, Some(out)).await;
                }
            }
            Err(e) => {
                let _ = err_tx.send(e).await;
                return;
            }
        }
    }

    if shared.cancel.is_cancelled() {
        return;
    }

    match chain.finish() {
        Ok(produced) => {
            for out in produced {
                pool.write(index, Some(out)).await;
            }
            pool.write(index, None).await;
        }
        Err(e) => {
            let _ = err_tx.send(e).await;
        }
    }
}
