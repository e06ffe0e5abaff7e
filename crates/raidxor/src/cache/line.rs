use std::collections::VecDeque;
use std::fmt;

use crate::cache::request::Queued;
use crate::layout::model::UnitIndex;
use crate::xor::LineBuffers;

/// Lifecycle of a cache line.
///
/// `Clean → Readying → Ready → LoadMe → Loading → UpToDate ⇄ Dirty → Writeback → UpToDate`,
/// with `Loading → Faulty → Recovery → UpToDate` when a data unit failed, and
/// `Recovery → Ready` when the line has to be abandoned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LineState {
    Clean,
    Readying,
    Ready,
    LoadMe,
    Loading,
    UpToDate,
    Dirty,
    Writeback,
    Faulty,
    Recovery,
}

impl LineState {
    /// `holds_data` reports whether application copies may touch the buffers.
    #[must_use]
    pub const fn holds_data(self) -> bool {
        matches!(self, Self::UpToDate | Self::Dirty)
    }

    /// `accepts_requests` reports whether queued requests will eventually be serviced.
    #[must_use]
    pub const fn accepts_requests(self) -> bool {
        !matches!(self, Self::Clean | Self::Readying | Self::Ready)
    }
}

impl fmt::Display for LineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Clean => "CLEAN",
            Self::Readying => "READYING",
            Self::Ready => "READY",
            Self::LoadMe => "LOAD_ME",
            Self::Loading => "LOADING",
            Self::UpToDate => "UPTODATE",
            Self::Dirty => "DIRTY",
            Self::Writeback => "WRITEBACK",
            Self::Faulty => "FAULTY",
            Self::Recovery => "RECOVERY",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferKind {
    Load,
    Writeback,
}

/// The group of per-unit sub-requests behind one load or writeback.
#[derive(Debug)]
pub struct LineTransfer {
    pub kind: TransferKind,
    pub remaining: usize,
    /// Raised when a data unit could not be read.
    pub faulty: bool,
    pub failed: Vec<UnitIndex>,
}

impl LineTransfer {
    #[must_use]
    pub const fn new(kind: TransferKind) -> Self {
        Self {
            kind,
            remaining: 0,
            faulty: false,
            failed: Vec::new(),
        }
    }
}

/// One staging slot, bound to at most one strip at a time.
#[derive(Debug)]
pub struct CacheLine {
    pub(crate) state: LineState,
    pub(crate) strip: Option<u64>,
    pub(crate) buffers: Option<LineBuffers>,
    pub(crate) waiting: VecDeque<Queued>,
    pub(crate) transfer: Option<LineTransfer>,
}

impl Default for CacheLine {
    fn default() -> Self {
        Self {
            state: LineState::Clean,
            strip: None,
            buffers: None,
            waiting: VecDeque::new(),
            transfer: None,
        }
    }
}

impl CacheLine {
    #[must_use]
    pub const fn state(&self) -> LineState {
        self.state
    }

    /// `strip` returns the aligned logical offset the line is bound to.
    #[must_use]
    pub const fn strip(&self) -> Option<u64> {
        self.strip
    }

    #[must_use]
    pub fn has_waiters(&self) -> bool {
        !self.waiting.is_empty()
    }

    #[must_use]
    pub fn queued(&self) -> usize {
        self.waiting.len()
    }

    #[must_use]
    pub const fn buffers(&self) -> Option<&LineBuffers> {
        self.buffers.as_ref()
    }

    #[must_use]
    pub const fn transfer(&self) -> Option<&LineTransfer> {
        self.transfer.as_ref()
    }

    /// `is_reclaimable` reports whether the router may rebind this line.
    #[must_use]
    pub fn is_reclaimable(&self) -> bool {
        match self.state {
            LineState::Clean => true,
            LineState::Ready => self.waiting.is_empty(),
            _ => false,
        }
    }
}
