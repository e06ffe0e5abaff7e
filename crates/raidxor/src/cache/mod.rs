//! Cache line pool and the per-line state machine.
//!
//! Every method here runs under the engine lock. Methods that start a
//! transfer or an XOR pass hand the work back to the caller, which performs
//! it after releasing the lock and reports the outcome through the matching
//! `complete_io` / `finish_*` method.


pub mod line;
pub mod pass;
pub mod request;

pub use line::{CacheLine, LineState, LineTransfer, TransferKind};
pub use pass::{PassKind, XorPass};
pub use request::{Direction, Queued, Request, RequestCallback};

use std::io;

use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::layout::geometry::Geometry;
use crate::layout::model::{Equation, LayoutModel, Role, Source, UnitIndex};
use crate::transport::UnitIo;
use crate::xor::{ChunkBuf, LineBuffers};

/// Buffer shape shared by every line of a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineShape {
    pub n_units: usize,
    pub n_temps: usize,
    pub block_size: usize,
    pub blocks_per_chunk: usize,
}

impl LineShape {
    #[must_use]
    pub fn of(model: &LayoutModel, geometry: &Geometry) -> Self {
        Self {
            n_units: model.n_units(),
            n_temps: model.temps().len(),
            block_size: geometry.block_size,
            blocks_per_chunk: geometry.blocks_per_chunk,
        }
    }

    /// `footprint` returns the bytes one allocated line holds.
    #[must_use]
    pub const fn footprint(&self) -> usize {
        LineBuffers::footprint(
            self.n_units,
            self.n_temps,
            self.block_size,
            self.blocks_per_chunk,
        )
    }
}

/// Requests whose copy has run, paired with their outcome.
pub type Completed = Vec<(Request, Result<()>)>;

/// A request the line refused, handed back so it can still be completed.
pub type Rejected = (Queued, Error);

/// Fixed-size arena of cache lines indexed by line number.
#[derive(Debug)]
pub struct Cache {
    lines: Vec<CacheLine>,
    shape: LineShape,
    max_bytes: Option<usize>,
    allocated: usize,
    n_waiting: usize,
}

impl Cache {
    /// `new` builds a pool of `n_lines` clean lines.
    ///
    /// # Errors
    /// Returns [`Error::Config`] when `n_lines` is zero.
    pub fn new(n_lines: usize, shape: LineShape, max_bytes: Option<usize>) -> Result<Self> {
        if n_lines == 0 {
            return Err(Error::Config("at least one cache line is required".into()));
        }
        Ok(Self {
            lines: (0..n_lines).map(|_| CacheLine::default()).collect(),
            shape,
            max_bytes,
            allocated: 0,
            n_waiting: 0,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    #[must_use]
    pub fn lines(&self) -> &[CacheLine] {
        &self.lines
    }

    #[must_use]
    pub fn line(&self, i: usize) -> Option<&CacheLine> {
        self.lines.get(i)
    }

    #[must_use]
    pub const fn shape(&self) -> LineShape {
        self.shape
    }

    /// `allocated_bytes` returns the bytes currently held by line buffers.
    #[must_use]
    pub const fn allocated_bytes(&self) -> usize {
        self.allocated
    }

    /// `n_waiting` returns how many submitters are blocked on a free line.
    #[must_use]
    pub const fn n_waiting(&self) -> usize {
        self.n_waiting
    }

    pub fn add_waiter(&mut self) {
        self.n_waiting += 1;
    }

    pub fn remove_waiter(&mut self) {
        self.n_waiting = self.n_waiting.saturating_sub(1);
    }

    fn set_state(line: &mut CacheLine, i: usize, to: LineState) {
        trace!(line = i, from = %line.state, to = %to, "line transition");
        line.state = to;
    }

    const fn refuse(line: &CacheLine, i: usize, op: &'static str) -> Error {
        Error::InvalidTransition {
            line: i,
            state: line.state,
            op,
        }
    }

    /// `make_ready` gives the line allocated, unbound buffers.
    ///
    /// `CLEAN` lines allocate through `READYING`; an `UPTODATE` line without
    /// waiters is unbound and keeps its buffers; `READY` is left alone.
    ///
    /// # Errors
    /// Returns [`Error::Allocation`] (line back in `CLEAN`) when the buffers cannot be
    /// allocated or would exceed the configured budget, and
    /// [`Error::InvalidTransition`] from any other state.
    pub fn make_ready(&mut self, i: usize) -> Result<()> {
        let shape = self.shape;
        let footprint = shape.footprint();
        let in_budget = self
            .max_bytes
            .is_none_or(|max| self.allocated + footprint <= max);
        let line = self.lines.get_mut(i).ok_or(Error::NoLine)?;
        match line.state {
            LineState::Ready => Ok(()),
            LineState::UpToDate if !line.has_waiters() => {
                line.strip = None;
                Self::set_state(line, i, LineState::Ready);
                Ok(())
            }
            LineState::Clean => {
                Self::set_state(line, i, LineState::Readying);
                let buffers = if in_budget {
                    LineBuffers::try_alloc(
                        shape.n_units,
                        shape.n_temps,
                        shape.block_size,
                        shape.blocks_per_chunk,
                    )
                    .ok()
                } else {
                    None
                };
                if let Some(buffers) = buffers {
                    line.buffers = Some(buffers);
                    Self::set_state(line, i, LineState::Ready);
                    self.allocated += footprint;
                    Ok(())
                } else {
                    Self::set_state(line, i, LineState::Clean);
                    warn!(line = i, bytes = footprint, in_budget, "line buffer allocation failed");
                    Err(Error::Allocation { line: i })
                }
            }
            _ => Err(Self::refuse(line, i, "make ready")),
        }
    }

    /// `make_clean` releases a `READY` line's buffers; already-`CLEAN` lines are left alone.
    ///
    /// # Errors
    /// Returns [`Error::InvalidTransition`] from any other state.
    pub fn make_clean(&mut self, i: usize) -> Result<()> {
        let footprint = self.shape.footprint();
        let line = self.lines.get_mut(i).ok_or(Error::NoLine)?;
        match line.state {
            LineState::Clean => Ok(()),
            LineState::Ready if !line.has_waiters() => {
                line.buffers = None;
                Self::set_state(line, i, LineState::Clean);
                self.allocated = self.allocated.saturating_sub(footprint);
                Ok(())
            }
            _ => Err(Self::refuse(line, i, "make clean")),
        }
    }

    /// `bind` attaches a `READY` line to the strip at `strip` and marks it `LOAD_ME`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidTransition`] unless the line is `READY`.
    pub fn bind(&mut self, i: usize, strip: u64) -> Result<()> {
        let line = self.lines.get_mut(i).ok_or(Error::NoLine)?;
        if line.state != LineState::Ready {
            return Err(Self::refuse(line, i, "bind"));
        }
        line.strip = Some(strip);
        Self::set_state(line, i, LineState::LoadMe);
        debug!(line = i, strip, "line bound");
        Ok(())
    }

    /// `enqueue` appends an admitted request to the line's FIFO.
    ///
    /// # Errors
    /// Hands the request back with [`Error::InvalidTransition`] when the line is not
    /// bound to a strip.
    pub fn enqueue(&mut self, i: usize, queued: Queued) -> std::result::Result<(), Rejected> {
        let Some(line) = self.lines.get_mut(i) else {
            return Err((queued, Error::NoLine));
        };
        if !line.state.accepts_requests() {
            let err = Self::refuse(line, i, "enqueue");
            return Err((queued, err));
        }
        line.waiting.push_back(queued);
        Ok(())
    }

    pub fn dequeue(&mut self, i: usize) -> Option<Queued> {
        self.lines.get_mut(i)?.waiting.pop_front()
    }

    /// `find_line` returns the line bound to `strip`, or else a reclaimable line.
    ///
    /// Allocated `READY` lines are preferred over `CLEAN` ones.
    #[must_use]
    pub fn find_line(&self, strip: u64) -> Option<usize> {
        self.lines
            .iter()
            .position(|l| l.strip == Some(strip) && l.state.accepts_requests())
            .or_else(|| {
                self.lines
                    .iter()
                    .position(|l| l.state == LineState::Ready && !l.has_waiters())
            })
            .or_else(|| self.lines.iter().position(|l| l.state == LineState::Clean))
    }

    /// `empty_lines` counts `CLEAN` lines and `READY` lines without waiters.
    #[must_use]
    pub fn empty_lines(&self) -> usize {
        self.lines.iter().filter(|l| l.is_reclaimable()).count()
    }

    /// `free_lines` counts lines a submitter could claim now, honoring the buffer budget.
    #[must_use]
    pub fn free_lines(&self) -> usize {
        let can_alloc = self
            .max_bytes
            .is_none_or(|max| self.allocated + self.shape.footprint() <= max);
        self.lines
            .iter()
            .filter(|l| match l.state {
                LineState::Ready => !l.has_waiters(),
                LineState::Clean => can_alloc,
                _ => false,
            })
            .count()
    }

    /// `start_load` moves `LOAD_ME → LOADING` and lends out one read per healthy unit.
    ///
    /// Faulty units are skipped; a faulty data unit raises the transfer's fault flag.
    /// When nothing needs reading the line settles before this returns.
    ///
    /// # Errors
    /// Returns [`Error::InvalidTransition`] unless the line is `LOAD_ME`.
    pub fn start_load(
        &mut self,
        i: usize,
        model: &LayoutModel,
        device_offset: u64,
    ) -> Result<Vec<UnitIo>> {
        let line = self.lines.get_mut(i).ok_or(Error::NoLine)?;
        if line.state != LineState::LoadMe {
            return Err(Self::refuse(line, i, "start load"));
        }
        let Some(buffers) = line.buffers.as_mut().filter(|b| b.all_present()) else {
            return Err(Error::Layout(format!("line {i} has no complete buffer set")));
        };

        let mut transfer = LineTransfer::new(TransferKind::Load);
        let mut ios = Vec::with_capacity(model.n_units());
        for (u, unit) in model.units().iter().enumerate() {
            if unit.is_faulty() {
                if unit.role() == Role::Data {
                    transfer.faulty = true;
                }
                continue;
            }
            if let Some(buf) = buffers.take_unit(u) {
                ios.push(UnitIo {
                    unit: u,
                    direction: Direction::Read,
                    device_offset,
                    buf,
                });
            }
        }
        transfer.remaining = ios.len();
        line.transfer = Some(transfer);
        Self::set_state(line, i, LineState::Loading);
        debug!(line = i, strip = ?line.strip, reads = ios.len(), "load started");
        if ios.is_empty() {
            Self::settle(line, i);
        }
        Ok(ios)
    }

    /// `complete_io` returns a sub-request's buffer and accounts for its outcome.
    ///
    /// A failed unit is marked faulty in `model`. A failed data-unit read raises
    /// the load's fault flag; a failed write does not fail the line.
    ///
    /// # Returns
    /// The state the line settled into once the last sub-request completed.
    ///
    /// # Errors
    /// Returns [`Error::InvalidTransition`] when no transfer is in flight on the line.
    pub fn complete_io(
        &mut self,
        i: usize,
        unit: UnitIndex,
        buf: ChunkBuf,
        result: io::Result<()>,
        model: &mut LayoutModel,
    ) -> Result<Option<LineState>> {
        let line = self.lines.get_mut(i).ok_or(Error::NoLine)?;
        if let Some(buffers) = line.buffers.as_mut() {
            buffers.put_unit(unit, buf);
        }
        let Some(transfer) = line.transfer.as_mut() else {
            return Err(Self::refuse(line, i, "complete transfer"));
        };
        if let Err(e) = result {
            warn!(line = i, unit, kind = ?transfer.kind, error = %e, "unit transfer failed");
            model.mark_faulty(unit)?;
            if transfer.kind == TransferKind::Load
                && model.unit(unit).is_some_and(|u| u.role() == Role::Data)
            {
                transfer.faulty = true;
            }
            transfer.failed.push(unit);
        }
        transfer.remaining = transfer.remaining.saturating_sub(1);
        if transfer.remaining > 0 {
            return Ok(None);
        }
        Ok(Self::settle(line, i))
    }

    fn settle(line: &mut CacheLine, i: usize) -> Option<LineState> {
        let transfer = line.transfer.take()?;
        let to = match transfer.kind {
            TransferKind::Load if transfer.faulty => LineState::Faulty,
            _ => LineState::UpToDate,
        };
        Self::set_state(line, i, to);
        debug!(line = i, kind = ?transfer.kind, failed = ?transfer.failed, state = %to, "transfer settled");
        Some(to)
    }

    fn steps_for(model: &LayoutModel, targets: &[(UnitIndex, &Equation)]) -> Vec<(Source, Equation)> {
        let mut steps: Vec<(Source, Equation)> = model
            .temps_for(targets.iter().map(|(_, eq)| *eq))
            .into_iter()
            .filter_map(|t| model.temps().get(t).map(|eq| (Source::Temp(t), eq.clone())))
            .collect();
        steps.extend(
            targets
                .iter()
                .map(|(u, eq)| (Source::Unit(*u), (*eq).clone())),
        );
        steps
    }

    /// `start_writeback` moves `DIRTY → WRITEBACK` and detaches the encoding pass.
    ///
    /// The pass recomputes every healthy redundant unit and the temporaries its
    /// encoding needs. Run it outside the lock, then call [`Cache::finish_writeback`].
    ///
    /// # Errors
    /// Returns [`Error::InvalidTransition`] unless the line is `DIRTY`.
    pub fn start_writeback(&mut self, i: usize, model: &LayoutModel) -> Result<XorPass> {
        let line = self.lines.get_mut(i).ok_or(Error::NoLine)?;
        if line.state != LineState::Dirty {
            return Err(Self::refuse(line, i, "write back"));
        }
        let Some(buffers) = line.buffers.take_if(|b| b.all_present()) else {
            return Err(Error::Layout(format!("line {i} has no complete buffer set")));
        };
        let encodings: Vec<(UnitIndex, &Equation)> = model
            .redundant_units()
            .filter(|r| !model.is_faulty(*r))
            .filter_map(|r| model.unit(r)?.encoding().map(|e| (r, e)))
            .collect();
        let steps = Self::steps_for(model, &encodings);
        Self::set_state(line, i, LineState::Writeback);
        Ok(XorPass {
            line: i,
            kind: PassKind::Writeback,
            buffers,
            steps,
            rebuilt: Vec::new(),
        })
    }

    /// `finish_writeback` reattaches the pass's buffers and lends out one write per healthy unit.
    ///
    /// # Errors
    /// Returns the pass's own error after putting the line back to `DIRTY`, or
    /// [`Error::InvalidTransition`] when the line is not in `WRITEBACK`.
    pub fn finish_writeback(
        &mut self,
        pass: XorPass,
        outcome: Result<()>,
        model: &LayoutModel,
        device_offset: u64,
    ) -> Result<Vec<UnitIo>> {
        let i = pass.line;
        let line = self.lines.get_mut(i).ok_or(Error::NoLine)?;
        if line.state != LineState::Writeback || line.buffers.is_some() {
            return Err(Self::refuse(line, i, "finish write back"));
        }
        let mut buffers = pass.buffers;
        if let Err(e) = outcome {
            line.buffers = Some(buffers);
            Self::set_state(line, i, LineState::Dirty);
            return Err(e);
        }

        let ios: Vec<UnitIo> = (0..model.n_units())
            .filter(|u| !model.is_faulty(*u))
            .filter_map(|u| {
                buffers.take_unit(u).map(|buf| UnitIo {
                    unit: u,
                    direction: Direction::Write,
                    device_offset,
                    buf,
                })
            })
            .collect();
        line.buffers = Some(buffers);
        let mut transfer = LineTransfer::new(TransferKind::Writeback);
        transfer.remaining = ios.len();
        line.transfer = Some(transfer);
        debug!(line = i, strip = ?line.strip, writes = ios.len(), "writeback started");
        if ios.is_empty() {
            Self::settle(line, i);
        }
        Ok(ios)
    }

    /// `start_recovery` moves `FAULTY → RECOVERY` and detaches the reconstruction pass.
    ///
    /// Every faulty data unit is rebuilt from its decoding; faulty redundant units
    /// are then recomputed from their encodings.
    ///
    /// # Errors
    /// Returns [`Error::NoDecoding`] (line left `FAULTY`) when a faulty data unit has no
    /// usable decoding, or [`Error::InvalidTransition`] unless the line is `FAULTY`.
    pub fn start_recovery(&mut self, i: usize, model: &LayoutModel) -> Result<XorPass> {
        let line = self.lines.get_mut(i).ok_or(Error::NoLine)?;
        if line.state != LineState::Faulty {
            return Err(Self::refuse(line, i, "recover"));
        }
        if !line.buffers.as_ref().is_some_and(LineBuffers::all_present) {
            return Err(Error::Layout(format!("line {i} has no complete buffer set")));
        }

        let lost: Vec<UnitIndex> = model
            .faulty_units()
            .filter(|u| model.unit(*u).is_some_and(|x| x.role() == Role::Data))
            .collect();
        let mut decodings = Vec::with_capacity(lost.len());
        for &u in &lost {
            let dec = model
                .usable_decoding(u)
                .ok_or(Error::NoDecoding { unit: u })?;
            decodings.push((u, dec));
        }
        let encodings: Vec<(UnitIndex, &Equation)> = model
            .faulty_units()
            .filter_map(|r| model.unit(r)?.encoding().map(|e| (r, e)))
            .collect();

        let mut steps = Self::steps_for(model, &decodings);
        steps.extend(Self::steps_for(model, &encodings));
        let Some(buffers) = line.buffers.take() else {
            return Err(Error::Layout(format!("line {i} has no complete buffer set")));
        };
        Self::set_state(line, i, LineState::Recovery);
        Ok(XorPass {
            line: i,
            kind: PassKind::Recovery,
            buffers,
            steps,
            rebuilt: lost,
        })
    }

    /// `finish_recovery` reattaches the pass's buffers and settles `RECOVERY → UPTODATE`.
    ///
    /// # Errors
    /// Returns the pass's own error with the line still in `RECOVERY`; the caller
    /// should [`Cache::abandon`] it.
    pub fn finish_recovery(&mut self, pass: XorPass, outcome: Result<()>) -> Result<()> {
        let i = pass.line;
        let line = self.lines.get_mut(i).ok_or(Error::NoLine)?;
        if line.state != LineState::Recovery || line.buffers.is_some() {
            return Err(Self::refuse(line, i, "finish recovery"));
        }
        line.buffers = Some(pass.buffers);
        outcome?;
        Self::set_state(line, i, LineState::UpToDate);
        info!(line = i, strip = ?line.strip, units = ?pass.rebuilt, "strip recovered");
        Ok(())
    }

    /// `abandon` unbinds the line back to `READY` and hands back every queued request.
    pub fn abandon(&mut self, i: usize) -> Vec<Queued> {
        let Some(line) = self.lines.get_mut(i) else {
            return Vec::new();
        };
        warn!(line = i, strip = ?line.strip, queued = line.waiting.len(), "line abandoned");
        line.strip = None;
        line.transfer = None;
        Self::set_state(line, i, LineState::Ready);
        line.waiting.drain(..).collect()
    }

    /// `service_requests` copies every queued request against the line's buffers.
    ///
    /// Applied writes move `UPTODATE → DIRTY`. The returned requests must be
    /// completed after the engine lock is released.
    ///
    /// # Errors
    /// Returns [`Error::InvalidTransition`] unless the line is `UPTODATE` or `DIRTY`.
    pub fn service_requests(
        &mut self,
        i: usize,
        geometry: &Geometry,
        model: &LayoutModel,
    ) -> Result<Completed> {
        let line = self.lines.get_mut(i).ok_or(Error::NoLine)?;
        if !line.state.holds_data() {
            return Err(Self::refuse(line, i, "service requests"));
        }
        let Some(buffers) = line.buffers.as_mut() else {
            return Err(Error::Layout(format!("line {i} has no buffers")));
        };
        let mut done = Vec::with_capacity(line.waiting.len());
        let mut wrote = false;
        while let Some(Queued {
            mut request,
            in_strip,
        }) = line.waiting.pop_front()
        {
            let res = copy_request(buffers, geometry, model, &mut request, in_strip);
            wrote |= res.is_ok() && request.direction == Direction::Write;
            done.push((request, res));
        }
        if wrote && line.state == LineState::UpToDate {
            Self::set_state(line, i, LineState::Dirty);
        }
        Ok(done)
    }
}

fn copy_request(
    buffers: &mut LineBuffers,
    geometry: &Geometry,
    model: &LayoutModel,
    request: &mut Request,
    in_strip: usize,
) -> Result<()> {
    let bs = geometry.block_size;
    let offset = request.offset;
    for (k, seg) in request.segments.iter_mut().enumerate() {
        if seg.len() != bs {
            return Err(Error::Misaligned(format!(
                "segment {k} is {} bytes, block size is {bs}",
                seg.len()
            )));
        }
        let (ordinal, block) = geometry.block_position(in_strip + k * bs);
        let unit = *model.data_units().get(ordinal).ok_or(Error::SpansStrips {
            offset,
            len: (k as u64 + 1) * bs as u64,
        })?;
        let chunk = buffers
            .unit_mut(unit)
            .ok_or_else(|| Error::Layout(format!("unit {unit} buffer is lent out")))?;
        match request.direction {
            Direction::Read => seg.copy_from_slice(chunk.block(block)),
            Direction::Write => chunk.block_mut(block).copy_from_slice(seg),
        }
    }
    Ok(())
}
