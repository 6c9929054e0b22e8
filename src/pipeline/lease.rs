use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::frame::{Frame, FrameId, FrameView};

/// Per-frame completion counter.
///
/// The frame is released when the last outstanding [`AnalysisTicket`] is
/// completed or dropped, whichever order the analyses finish in. Because
/// tickets release on `Drop`, a panicking or cancelled analysis still counts.
pub struct FrameLease {
    frame: Frame,
    outstanding: AtomicUsize,
}

impl FrameLease {
    /// Take ownership of `frame` and return the first ticket.
    ///
    /// The caller holds that ticket while it hands out more with
    /// [`AnalysisTicket::share`], then completes it, so the count cannot reach
    /// zero while analyses are still being registered.
    pub fn open(frame: Frame) -> AnalysisTicket {
        let lease = Arc::new(FrameLease {
            frame,
            outstanding: AtomicUsize::new(1),
        });
        AnalysisTicket { lease }
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    fn finish_one(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.frame.release();
        }
    }
}

/// One analysis's share of a frame lease.
pub struct AnalysisTicket {
    lease: Arc<FrameLease>,
}

impl AnalysisTicket {
    /// Register another analysis against the same frame.
    pub fn share(&self) -> AnalysisTicket {
        self.lease.outstanding.fetch_add(1, Ordering::AcqRel);
        AnalysisTicket {
            lease: Arc::clone(&self.lease),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.lease.frame.id()
    }

    pub fn view(&self) -> FrameView<'_> {
        self.lease.frame.view()
    }

    pub fn lease(&self) -> &FrameLease {
        &self.lease
    }

    /// Mark this analysis finished.
    pub fn complete(self) {}
}

impl Drop for AnalysisTicket {
    fn drop(&mut self) {
        self.lease.finish_one();
    }
}
