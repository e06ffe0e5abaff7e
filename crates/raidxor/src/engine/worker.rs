use std::io;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::MutexGuard;
use tracing::{debug, error, trace};

use crate::cache::{CacheLine, Direction, LineState};
use crate::engine::{Shared, State};
use crate::error::Error;
use crate::layout::model::UnitIndex;
use crate::layout::solver;
use crate::metrics::{self, UnitOp};
use crate::transport::UnitIo;
use crate::xor::ChunkBuf;

type Guard<'a> = MutexGuard<'a, State>;

/// `run` is the worker loop: scan every line, act on it, idle when a full pass
/// changed nothing.
pub(super) fn run(shared: &Arc<Shared>) {
    debug!("worker started");
    let mut st = shared.state.lock();
    while !st.exit {
        st.kicked = false;
        let mut progressed = line_pass(shared, &mut st);
        if st.cache.n_waiting() > 0 || st.flushing {
            progressed |= reclaim_pass(shared, &mut st);
        }
        if progressed {
            shared.changed.notify_all();
            continue;
        }
        if !st.kicked && !st.exit {
            shared.wake.wait(&mut st);
        }
    }
    debug!("worker stopped");
}

fn line_pass(shared: &Arc<Shared>, st: &mut Guard<'_>) -> bool {
    let mut progressed = false;
    for i in 0..st.cache.len() {
        let Some(line) = st.cache.line(i) else {
            continue;
        };
        progressed |= match (line.state(), line.has_waiters()) {
            (LineState::LoadMe, _) => start_load(shared, st, i),
            (LineState::Faulty, _) => recover(shared, st, i),
            (LineState::UpToDate | LineState::Dirty, true) => service(shared, st, i),
            _ => false,
        };
    }
    progressed
}

/// `reclaim_pass` writes back idle dirty lines and demotes idle clean ones while
/// submitters wait for a line.
fn reclaim_pass(shared: &Arc<Shared>, st: &mut Guard<'_>) -> bool {
    let mut progressed = false;
    for i in 0..st.cache.len() {
        let Some(line) = st.cache.line(i) else {
            continue;
        };
        if line.has_waiters() {
            continue;
        }
        match line.state() {
            LineState::Dirty => progressed |= start_writeback(shared, st, i),
            LineState::UpToDate if st.cache.n_waiting() > st.cache.free_lines() => {
                if st.cache.make_ready(i).is_ok() {
                    debug!(line = i, "line reclaimed");
                    progressed = true;
                }
            }
            _ => {}
        }
    }
    progressed
}

fn device_offset(shared: &Shared, st: &State, i: usize) -> Option<u64> {
    st.cache
        .line(i)
        .and_then(CacheLine::strip)
        .map(|strip| shared.geometry.device_offset(strip))
}

fn start_load(shared: &Arc<Shared>, st: &mut Guard<'_>, i: usize) -> bool {
    let Some(offset) = device_offset(shared, st, i) else {
        return false;
    };
    let s = &mut **st;
    match s.cache.start_load(i, &s.model, offset) {
        Ok(ios) => issue(shared, st, i, ios),
        Err(e) => {
            error!(line = i, error = %e, "cannot start load");
            abandon(shared, st, i, e.to_string());
        }
    }
    true
}

fn start_writeback(shared: &Arc<Shared>, st: &mut Guard<'_>, i: usize) -> bool {
    let Some(offset) = device_offset(shared, st, i) else {
        return false;
    };
    let s = &mut **st;
    let mut pass = match s.cache.start_writeback(i, &s.model) {
        Ok(pass) => pass,
        Err(e) => {
            writeback_failed(shared, st, i, &e);
            return true;
        }
    };
    let batch = shared.config.xor_batch;
    let outcome = MutexGuard::unlocked(st, || pass.run(batch));
    let s = &mut **st;
    match s.cache.finish_writeback(pass, outcome, &s.model, offset) {
        Ok(ios) => issue(shared, st, i, ios),
        Err(e) => writeback_failed(shared, st, i, &e),
    }
    true
}

/// Dirty data that cannot be encoded is lost; the array stops taking requests.
fn writeback_failed(shared: &Arc<Shared>, st: &mut Guard<'_>, i: usize, e: &Error) {
    error!(line = i, error = %e, "writeback failed");
    shared.halt(st, format!("writeback of line {i} failed: {e}"));
    abandon(shared, st, i, e.to_string());
}

fn recover(shared: &Arc<Shared>, st: &mut Guard<'_>, i: usize) -> bool {
    if shared.config.derive_decodings {
        solver::derive_missing(&mut st.model);
    }
    let s = &mut **st;
    match s.cache.start_recovery(i, &s.model) {
        Ok(mut pass) => {
            let batch = shared.config.xor_batch;
            let outcome = MutexGuard::unlocked(st, || pass.run(batch));
            if let Err(e) = st.cache.finish_recovery(pass, outcome) {
                abandon(shared, st, i, e.to_string());
            }
        }
        Err(e) => abandon(shared, st, i, e.to_string()),
    }
    true
}

fn service(shared: &Arc<Shared>, st: &mut Guard<'_>, i: usize) -> bool {
    let s = &mut **st;
    match s.cache.service_requests(i, &shared.geometry, &s.model) {
        Ok(done) => MutexGuard::unlocked(st, || shared.deliver(done)),
        Err(e) => {
            error!(line = i, error = %e, "cannot service requests");
            abandon(shared, st, i, e.to_string());
        }
    }
    true
}

/// `abandon` returns the line to `READY` and fails everything queued on it.
fn abandon(shared: &Arc<Shared>, st: &mut Guard<'_>, i: usize, reason: String) {
    let strip = st.cache.line(i).and_then(CacheLine::strip).unwrap_or_default();
    let drained = st.cache.abandon(i);
    let err = Error::Unrecoverable { strip, reason };
    if shared.config.halt_on_unrecoverable {
        shared.halt(st, err.to_string());
    }
    if !drained.is_empty() {
        let failed = drained
            .into_iter()
            .map(|queued| (queued.request, Err(err.clone())))
            .collect();
        MutexGuard::unlocked(st, || shared.deliver(failed));
    }
}

/// `issue` hands sub-requests to the transport with the lock released.
fn issue(shared: &Arc<Shared>, st: &mut Guard<'_>, line: usize, ios: Vec<UnitIo>) {
    if ios.is_empty() {
        return;
    }
    MutexGuard::unlocked(st, || {
        for io in ios {
            let unit = io.unit;
            let direction = io.direction;
            let started = Instant::now();
            let done_shared = Arc::clone(shared);
            shared.transport.issue(
                io,
                Box::new(move |buf, result| {
                    done_shared.complete_io(line, unit, direction, started, buf, result);
                }),
            );
        }
    });
}

impl Shared {
    /// `complete_io` is the per-sub-request completion, run on the transport's thread.
    fn complete_io(
        &self,
        line: usize,
        unit: UnitIndex,
        direction: Direction,
        started: Instant,
        buf: ChunkBuf,
        result: io::Result<()>,
    ) {
        let failed = result.is_err();
        metrics::record_unit_op(UnitOp {
            unit,
            op: direction,
            bytes: buf.len() as u64,
            latency_seconds: started.elapsed().as_secs_f64(),
            error: failed,
        });

        let mut st = self.state.lock();
        let s = &mut *st;
        match s.cache.complete_io(line, unit, buf, result, &mut s.model) {
            Ok(Some(state)) => trace!(line, %state, "line transfer complete"),
            Ok(None) => {}
            Err(e) => error!(line, unit, error = %e, "stray transfer completion"),
        }
        if failed && self.config.derive_decodings {
            solver::derive_missing(&mut s.model);
        }
        self.kick(s);
        self.changed.notify_all();
    }
}
