//! The owning context of one array: request router, worker, fault control
//! and shutdown.
//!
//! All shared state lives in one [`State`] behind a single mutex. The worker
//! thread and every transfer completion serialize through it, and nobody holds
//! it while issuing a transfer or running an XOR pass. Request completions run
//! on a separate completion thread, so a callback may submit again.


mod config;
mod status;
mod worker;

pub use config::{DEFAULT_LINES, EngineConfig};
pub use status::{ArrayStatus, LineStatus, UnitStatus};

use std::ops::Range;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Sender, bounded, unbounded};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::cache::{Cache, CacheLine, Completed, LineShape, LineState, Queued, Request};
use crate::error::{Error, Result};
use crate::layout::geometry::Geometry;
use crate::layout::model::{Decoding, LayoutModel, UnitIndex};
use crate::layout::solver;
use crate::transport::Transport;

struct State {
    cache: Cache,
    model: LayoutModel,
    stopping: bool,
    /// Write back dirty lines even when nobody waits for a line.
    flushing: bool,
    exit: bool,
    /// A wake signal arrived while the worker was busy.
    kicked: bool,
    halted: Option<String>,
}

impl State {
    fn rejection(&self) -> Option<Error> {
        if let Some(reason) = &self.halted {
            return Some(Error::Halted(reason.clone()));
        }
        if self.stopping {
            return Some(Error::Stopping);
        }
        None
    }

    /// `is_drained` reports whether nothing is queued, in flight or dirty.
    fn is_drained(&self) -> bool {
        self.cache.n_waiting() == 0
            && self.cache.lines().iter().all(|l| {
                !l.has_waiters()
                    && matches!(
                        l.state(),
                        LineState::Clean | LineState::Ready | LineState::UpToDate
                    )
            })
    }
}

struct Shared {
    state: Mutex<State>,
    /// Wakes the worker.
    wake: Condvar,
    /// Wakes blocked submitters and `drain_and_stop`.
    changed: Condvar,
    geometry: Geometry,
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    completions: Sender<Completion>,
}

/// Work for the completion thread.
enum Completion {
    Batch(Completed),
    Stop,
}

impl Shared {
    fn kick(&self, st: &mut State) {
        st.kicked = true;
        self.wake.notify_one();
    }

    fn halt(&self, st: &mut State, reason: String) {
        if st.halted.is_none() {
            error!(%reason, "array halted");
            st.halted = Some(reason);
        }
        self.changed.notify_all();
    }

    /// `deliver` hands finished requests to the completion thread. Call it unlocked.
    fn deliver(&self, batch: Completed) {
        if batch.is_empty() {
            return;
        }
        if let Err(unsent) = self.completions.send(Completion::Batch(batch)) {
            if let Completion::Batch(batch) = unsent.into_inner() {
                for (request, result) in batch {
                    request.complete(result);
                }
            }
        }
    }
}

struct Threads {
    worker: JoinHandle<()>,
    completer: JoinHandle<()>,
}

impl Threads {
    /// `join` waits for the worker, then lets the completion thread finish its backlog.
    fn join(self, shared: &Shared) {
        if self.worker.join().is_err() {
            error!("worker thread panicked");
        }
        shared.completions.send(Completion::Stop).ok();
        if self.completer.join().is_err() {
            error!("completion thread panicked");
        }
    }
}

/// An XOR erasure-coded array engine.
pub struct Engine {
    shared: Arc<Shared>,
    threads: Mutex<Option<Threads>>,
}

impl Engine {
    /// `start` validates the configuration and spawns the worker thread.
    ///
    /// # Arguments
    /// * `model` - Units, encodings and initial decodings; units already known faulty
    ///   should be marked before the call.
    /// * `geometry` - Block, chunk and strip sizes.
    /// * `config` - Engine tunables.
    /// * `transport` - Raw block transport to the member devices.
    ///
    /// # Errors
    /// Returns [`Error::Config`] when the configuration is invalid, the geometry's data
    /// unit count disagrees with the layout, or the worker cannot be spawned.
    pub fn start(
        model: LayoutModel,
        geometry: Geometry,
        config: EngineConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;
        if geometry.data_units != model.data_units().len() {
            return Err(Error::Config(format!(
                "geometry has {} data units, layout has {}",
                geometry.data_units,
                model.data_units().len()
            )));
        }
        let mut model = model;
        if config.derive_decodings {
            solver::derive_missing(&mut model);
        }
        let cache = Cache::new(
            config.lines,
            LineShape::of(&model, &geometry),
            config.max_buffer_bytes,
        )?;

        info!(
            units = model.n_units(),
            data_units = geometry.data_units,
            lines = config.lines,
            strip_size = geometry.strip_size(),
            capacity = geometry.capacity(),
            "engine started"
        );
        let (completions, completed) = unbounded();
        let completer = std::thread::Builder::new()
            .name("raidxor-complete".into())
            .spawn(move || {
                for msg in completed {
                    match msg {
                        Completion::Batch(batch) => {
                            for (request, result) in batch {
                                request.complete(result);
                            }
                        }
                        Completion::Stop => break,
                    }
                }
            })
            .map_err(|e| Error::Config(format!("cannot spawn completion thread: {e}")))?;
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                cache,
                model,
                stopping: false,
                flushing: false,
                exit: false,
                kicked: false,
                halted: None,
            }),
            wake: Condvar::new(),
            changed: Condvar::new(),
            geometry,
            config,
            transport,
            completions,
        });
        let worker_shared = Arc::clone(&shared);
        let worker = match std::thread::Builder::new()
            .name("raidxor-worker".into())
            .spawn(move || worker::run(&worker_shared))
        {
            Ok(worker) => worker,
            Err(e) => {
                shared.completions.send(Completion::Stop).ok();
                return Err(Error::Config(format!("cannot spawn worker: {e}")));
            }
        };
        Ok(Self {
            shared,
            threads: Mutex::new(Some(Threads { worker, completer })),
        })
    }

    #[must_use]
    pub fn geometry(&self) -> &Geometry {
        &self.shared.geometry
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// `submit` routes a request to the line for its strip.
    ///
    /// Blocks while every line is busy. Every outcome, including rejection, is
    /// delivered through the request's completion.
    pub fn submit(&self, request: Request) {
        if let Err((request, err)) = self.admit(request) {
            debug!(offset = request.offset(), dir = %request.direction(), error = %err, "request rejected");
            request.complete(Err(err));
        }
    }

    fn admit(&self, request: Request) -> std::result::Result<(), (Request, Error)> {
        let geom = &self.shared.geometry;
        if let Err(err) = validate(geom, &request) {
            return Err((request, err));
        }
        let (strip, in_strip) = geom.locate(request.offset());

        let mut st = self.shared.state.lock();
        if let Some(err) = st.rejection() {
            return Err((request, err));
        }
        // Submitters already admitted keep going while the engine drains.
        loop {
            if st.exit {
                return Err((request, Error::Stopping));
            }
            if let Some(reason) = &st.halted {
                let err = Error::Halted(reason.clone());
                return Err((request, err));
            }
            if let Some(i) = st.cache.find_line(strip) {
                match claim(&mut st.cache, i, strip) {
                    Ok(()) => {
                        let queued = Queued { request, in_strip };
                        return match st.cache.enqueue(i, queued) {
                            Ok(()) => {
                                self.shared.kick(&mut st);
                                Ok(())
                            }
                            Err((queued, err)) => Err((queued.request, err)),
                        };
                    }
                    // Another allocated line will come free; wait for it.
                    Err(Error::Allocation { .. }) if st.cache.allocated_bytes() > 0 => {}
                    Err(err) => return Err((request, err)),
                }
            }
            st.cache.add_waiter();
            debug!(strip, waiting = st.cache.n_waiting(), "waiting for a free line");
            self.shared.kick(&mut st);
            self.shared.changed.wait(&mut st);
            st.cache.remove_waiter();
        }
    }

    /// `read_blocking` reads `blocks` blocks at `offset` inside one strip.
    ///
    /// # Errors
    /// Returns the request's failure.
    pub fn read_blocking(&self, offset: u64, blocks: usize) -> Result<Vec<Vec<u8>>> {
        let (tx, rx) = bounded(1);
        let segments = vec![vec![0u8; self.shared.geometry.block_size]; blocks];
        self.submit(Request::read(offset, segments, move |r| {
            tx.send(r).ok();
        }));
        rx.recv()
            .map_err(|_| Error::Halted("request completion dropped".into()))?
    }

    /// `write_blocking` writes block-sized `segments` at `offset` inside one strip.
    ///
    /// # Errors
    /// Returns the request's failure.
    pub fn write_blocking(&self, offset: u64, segments: Vec<Vec<u8>>) -> Result<()> {
        let (tx, rx) = bounded(1);
        self.submit(Request::write(offset, segments, move |r| {
            tx.send(r.map(|_| ())).ok();
        }));
        rx.recv()
            .map_err(|_| Error::Halted("request completion dropped".into()))?
    }

    /// `split` cuts a block-aligned byte range at strip boundaries.
    ///
    /// The whole range is checked against capacity first, so no piece is
    /// submitted for a range that cannot complete.
    fn split(&self, offset: u64, len: usize) -> Result<Vec<(u64, Range<usize>)>> {
        let geom = &self.shared.geometry;
        if len % geom.block_size != 0 {
            return Err(Error::Misaligned(format!(
                "length {len} is not a multiple of block size {}",
                geom.block_size
            )));
        }
        let capacity = geom.capacity();
        if offset
            .checked_add(len as u64)
            .is_none_or(|end| end > capacity)
        {
            return Err(Error::OutOfRange {
                offset,
                len: len as u64,
                capacity,
            });
        }
        let mut pieces = Vec::new();
        let mut done = 0usize;
        while done < len {
            // offset + len <= capacity, so no piece overflows.
            let pos = offset + done as u64;
            let (_, in_strip) = geom.locate(pos);
            let take = (geom.strip_size() - in_strip).min(len - done);
            pieces.push((pos, done..done + take));
            done += take;
        }
        Ok(pieces)
    }

    /// `write_at` writes a block-aligned buffer that may cross strips.
    ///
    /// One request per strip is submitted; all of them are awaited.
    ///
    /// # Errors
    /// Returns the first failure among the per-strip requests.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let bs = self.shared.geometry.block_size;
        let pieces = self.split(offset, data.len())?;
        let (tx, rx) = unbounded();
        for (pos, range) in &pieces {
            let segments = data[range.clone()].chunks(bs).map(<[u8]>::to_vec).collect();
            let tx = tx.clone();
            self.submit(Request::write(*pos, segments, move |r| {
                tx.send(r.map(|_| ())).ok();
            }));
        }
        drop(tx);
        let mut first_err = None;
        for _ in 0..pieces.len() {
            match rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first_err.get_or_insert(e);
                }
                Err(_) => {
                    first_err.get_or_insert(Error::Halted("request completion dropped".into()));
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// `read_at` reads `len` block-aligned bytes that may cross strips.
    ///
    /// # Errors
    /// Returns the first failure among the per-strip requests.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let bs = self.shared.geometry.block_size;
        let pieces = self.split(offset, len)?;
        let (tx, rx) = unbounded();
        for (k, (pos, range)) in pieces.iter().enumerate() {
            let tx = tx.clone();
            let segments = vec![vec![0u8; bs]; range.len() / bs];
            self.submit(Request::read(*pos, segments, move |r| {
                tx.send((k, r)).ok();
            }));
        }
        drop(tx);
        let mut out = vec![0u8; len];
        for _ in 0..pieces.len() {
            let (k, result) = rx
                .recv()
                .map_err(|_| Error::Halted("request completion dropped".into()))?;
            let segments = result?;
            let start = pieces[k].1.start;
            for (j, seg) in segments.iter().enumerate() {
                out[start + j * bs..start + (j + 1) * bs].copy_from_slice(seg);
            }
        }
        Ok(out)
    }

    /// `mark_faulty` reports a device fault from outside the transport.
    ///
    /// # Returns
    /// `true` when the unit was not already faulty.
    ///
    /// # Errors
    /// Returns [`Error::Layout`] for an unknown unit.
    pub fn mark_faulty(&self, unit: UnitIndex) -> Result<bool> {
        let mut st = self.shared.state.lock();
        let newly = st.model.mark_faulty(unit)?;
        if newly && self.shared.config.derive_decodings {
            solver::derive_missing(&mut st.model);
        }
        self.shared.kick(&mut st);
        Ok(newly)
    }

    /// `set_decoding` supplies a decoding for a data unit.
    ///
    /// # Errors
    /// Returns [`Error::Layout`] when the decoding is invalid or depends on a faulty unit.
    pub fn set_decoding(&self, unit: UnitIndex, decoding: Decoding) -> Result<()> {
        let mut st = self.shared.state.lock();
        st.model.set_decoding(unit, decoding)?;
        self.shared.kick(&mut st);
        Ok(())
    }

    /// `derive_decodings` runs the solver for every data unit without a usable decoding.
    ///
    /// # Returns
    /// The units that received a new decoding.
    pub fn derive_decodings(&self) -> Vec<UnitIndex> {
        let mut st = self.shared.state.lock();
        let installed = solver::derive_missing(&mut st.model);
        if !installed.is_empty() {
            info!(units = ?installed, "decodings derived");
            self.shared.kick(&mut st);
        }
        installed
    }

    /// `halt` enters the hard-error state: every later submission fails.
    pub fn halt(&self, reason: impl Into<String>) {
        let mut st = self.shared.state.lock();
        self.shared.halt(&mut st, reason.into());
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.shared.state.lock().halted.is_some()
    }

    /// `status` snapshots line states and unit fault flags.
    #[must_use]
    pub fn status(&self) -> ArrayStatus {
        let st = self.shared.state.lock();
        ArrayStatus::capture(&st.cache, &st.model, st.stopping, st.halted.as_deref())
    }

    /// `drain_and_stop` stops admission, waits for in-flight transfers and dirty
    /// lines to finish, stops the worker and releases every line buffer.
    ///
    /// Submitters already blocked on a free line are still served. Every request
    /// completion has run when this returns.
    ///
    /// # Errors
    /// Returns [`Error::InvalidTransition`] if a line could not be released.
    pub fn drain_and_stop(&self) -> Result<()> {
        let Some(threads) = self.threads.lock().take() else {
            return Ok(());
        };
        {
            let mut st = self.shared.state.lock();
            st.stopping = true;
            st.flushing = true;
            info!("draining");
            self.shared.kick(&mut st);
            while !st.is_drained() {
                self.shared.changed.wait(&mut st);
            }
            st.exit = true;
            self.shared.kick(&mut st);
        }
        threads.join(&self.shared);

        let mut st = self.shared.state.lock();
        for i in 0..st.cache.len() {
            if st.cache.line(i).map(CacheLine::state) == Some(LineState::UpToDate) {
                st.cache.make_ready(i)?;
            }
            st.cache.make_clean(i)?;
        }
        info!("engine stopped");
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let Some(threads) = self.threads.get_mut().take() else {
            return;
        };
        {
            let mut st = self.shared.state.lock();
            if !st.is_drained() {
                warn!("engine dropped without drain_and_stop; unflushed lines are discarded");
            }
            st.stopping = true;
            st.exit = true;
            self.shared.kick(&mut st);
            self.shared.changed.notify_all();
        }
        threads.join(&self.shared);
    }
}

/// `claim` readies and binds line `i` for `strip` unless it is already bound there.
fn claim(cache: &mut Cache, i: usize, strip: u64) -> Result<()> {
    let state = cache.line(i).map(CacheLine::state).ok_or(Error::NoLine)?;
    if state.accepts_requests() {
        return Ok(());
    }
    cache.make_ready(i)?;
    cache.bind(i, strip)
}

/// `validate` checks a request against the block and strip layout.
fn validate(geom: &Geometry, request: &Request) -> Result<()> {
    let bs = geom.block_size;
    let offset = request.offset();
    if request.segments().is_empty() {
        return Err(Error::Misaligned("request has no segments".into()));
    }
    if let Some((k, seg)) = request
        .segments()
        .iter()
        .enumerate()
        .find(|(_, s)| s.len() != bs)
    {
        return Err(Error::Misaligned(format!(
            "segment {k} is {} bytes, block size is {bs}",
            seg.len()
        )));
    }
    if offset % bs as u64 != 0 {
        return Err(Error::Misaligned(format!(
            "offset {offset} is not a multiple of block size {bs}"
        )));
    }
    let len = request.len();
    let capacity = geom.capacity();
    if offset.checked_add(len).is_none_or(|end| end > capacity) {
        return Err(Error::OutOfRange {
            offset,
            len,
            capacity,
        });
    }
    let (_, in_strip) = geom.locate(offset);
    if in_strip as u64 + len > geom.strip_size() as u64 {
        return Err(Error::SpansStrips { offset, len });
    }
    Ok(())
}
