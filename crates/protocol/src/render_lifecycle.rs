//! Render lifecycle tracking
//!
//! A render cycle is the span from `RenderStart` to `RenderComplete`. The
//! tracker hands out at most one [`RenderCycle`] guard at a time; the guard
//! emits `RenderStart` when created and `RenderComplete` when dropped, so every
//! exit path of the render code (success, error, early return, abort) closes
//! the cycle exactly once.

use crate::transport::Transport;
use chart_frame_shared::events::RenderErrorPayload;
use chart_frame_shared::{Event, ProtocolError, ProtocolResult};
use futures::future::{AbortHandle, Abortable};
use futures::Future;
use std::cell::{Cell, RefCell};

/// Phase of the current render cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPhase {
    Idle,
    Started,
    Completed,
    Errored,
}

/// Render cycle statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub cycles_started: u64,
    pub cycles_completed: u64,
    pub errors: u64,
    pub superseded: u64,
}

/// Gates render cycles so the render callback never runs concurrently with itself
#[derive(Debug)]
pub struct RenderLifecycleTracker {
    phase: Cell<RenderPhase>,
    last_outcome: Cell<Option<RenderPhase>>,
    abort: RefCell<Option<AbortHandle>>,
    stats: Cell<RenderStats>,
}

impl Default for RenderLifecycleTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderLifecycleTracker {
    pub fn new() -> Self {
        Self {
            phase: Cell::new(RenderPhase::Idle),
            last_outcome: Cell::new(None),
            abort: RefCell::new(None),
            stats: Cell::new(RenderStats::default()),
        }
    }

    pub fn phase(&self) -> RenderPhase {
        self.phase.get()
    }

    /// `Completed` or `Errored` for the most recent finished cycle
    pub fn last_outcome(&self) -> Option<RenderPhase> {
        self.last_outcome.get()
    }

    pub fn is_rendering(&self) -> bool {
        self.phase.get() != RenderPhase::Idle
    }

    pub fn stats(&self) -> RenderStats {
        self.stats.get()
    }

    /// Open a render cycle, emitting `RenderStart`
    pub fn begin<'a>(&'a self, transport: &'a Transport) -> ProtocolResult<RenderCycle<'a>> {
        if self.is_rendering() {
            log::warn!("Render requested while a cycle is still running");
            return Err(ProtocolError::RenderInProgress);
        }

        self.phase.set(RenderPhase::Started);
        self.update_stats(|stats| stats.cycles_started += 1);

        if let Err(e) = transport.post(Event::RenderStart) {
            log::warn!("Failed to emit RenderStart: {e}");
        }

        Ok(RenderCycle {
            tracker: self,
            transport,
            failed: false,
        })
    }

    /// Abort the render future of the live cycle, if any
    ///
    /// The aborted cycle still ends with `RenderComplete` once its guard drops.
    pub fn supersede(&self) -> bool {
        match self.abort.borrow_mut().take() {
            Some(handle) => {
                log::info!("Superseding in-flight render cycle");
                handle.abort();
                self.update_stats(|stats| stats.superseded += 1);
                true
            }
            None => false,
        }
    }

    fn update_stats(&self, f: impl FnOnce(&mut RenderStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }
}

/// Scoped render cycle; dropping it emits `RenderComplete`
pub struct RenderCycle<'a> {
    tracker: &'a RenderLifecycleTracker,
    transport: &'a Transport,
    failed: bool,
}

impl<'a> RenderCycle<'a> {
    /// Wrap the render future so a superseding model update can abort it
    pub fn abortable<F: Future>(&self, future: F) -> Abortable<F> {
        let (handle, registration) = AbortHandle::new_pair();
        *self.tracker.abort.borrow_mut() = Some(handle);
        Abortable::new(future, registration)
    }

    /// Emit `RenderError` for this cycle; only the first failure is reported
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.failed {
            return;
        }

        self.failed = true;
        self.tracker.phase.set(RenderPhase::Errored);
        self.tracker.update_stats(|stats| stats.errors += 1);

        let payload = RenderErrorPayload {
            has_error: true,
            error: error.into(),
        };
        if let Err(e) = self.transport.post(Event::RenderError(payload)) {
            log::warn!("Failed to emit RenderError: {e}");
        }
    }
}

impl Drop for RenderCycle<'_> {
    fn drop(&mut self) {
        let outcome = if self.failed {
            RenderPhase::Errored
        } else {
            RenderPhase::Completed
        };

        self.tracker.abort.borrow_mut().take();
        self.tracker.last_outcome.set(Some(outcome));
        self.tracker.phase.set(RenderPhase::Idle);
        self.tracker
            .update_stats(|stats| stats.cycles_completed += 1);

        if let Err(e) = self.transport.post(Event::RenderComplete) {
            log::warn!("Failed to emit RenderComplete: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolConfig;
    use crate::memory::{self, MemoryEndpoint};
    use crate::timer::TokioTimer;
    use chart_frame_shared::{EventTag, MessageSource};
    use std::rc::Rc;

    fn frame_transport() -> (Transport, Rc<MemoryEndpoint>, memory::InboundStream) {
        let ((_host, host_rx), (frame, _frame_rx)) =
            memory::pair("https://host.example", "https://frame.example");
        let frame = Rc::new(frame);
        let transport = Transport::new(
            frame.clone(),
            MessageSource::Frame,
            &ProtocolConfig::new("https://host.example"),
            Rc::new(TokioTimer),
        );
        (transport, frame, host_rx)
    }

    #[test]
    fn test_successful_cycle() {
        let (transport, endpoint, _host_rx) = frame_transport();
        let tracker = RenderLifecycleTracker::new();

        {
            let _cycle = tracker.begin(&transport).unwrap();
            assert_eq!(tracker.phase(), RenderPhase::Started);
        }

        assert_eq!(tracker.phase(), RenderPhase::Idle);
        assert_eq!(tracker.last_outcome(), Some(RenderPhase::Completed));
        assert_eq!(
            endpoint.sent_tags(),
            vec![EventTag::RenderStart, EventTag::RenderComplete]
        );
    }

    #[test]
    fn test_failed_cycle_reports_error_once() {
        let (transport, endpoint, _host_rx) = frame_transport();
        let tracker = RenderLifecycleTracker::new();

        {
            let mut cycle = tracker.begin(&transport).unwrap();
            cycle.fail("boom");
            cycle.fail("second failure is swallowed");
            assert_eq!(tracker.phase(), RenderPhase::Errored);
        }

        assert_eq!(tracker.last_outcome(), Some(RenderPhase::Errored));
        assert_eq!(
            endpoint.sent_tags(),
            vec![
                EventTag::RenderStart,
                EventTag::RenderError,
                EventTag::RenderComplete
            ]
        );
        assert_eq!(endpoint.sent()[1]["payload"]["error"], "boom");
        assert_eq!(tracker.stats().errors, 1);
    }

    #[test]
    fn test_concurrent_begin_rejected() {
        let (transport, endpoint, _host_rx) = frame_transport();
        let tracker = RenderLifecycleTracker::new();

        let cycle = tracker.begin(&transport).unwrap();
        assert!(matches!(
            tracker.begin(&transport),
            Err(ProtocolError::RenderInProgress)
        ));
        drop(cycle);

        assert!(tracker.begin(&transport).is_ok());
        assert_eq!(
            endpoint.sent_tags(),
            vec![
                EventTag::RenderStart,
                EventTag::RenderComplete,
                EventTag::RenderStart,
                EventTag::RenderComplete
            ]
        );
    }

    #[tokio::test]
    async fn test_supersede_aborts_render_future() {
        let (transport, endpoint, _host_rx) = frame_transport();
        let tracker = RenderLifecycleTracker::new();

        let outcome = {
            let cycle = tracker.begin(&transport).unwrap();
            let pending = cycle.abortable(futures::future::pending::<()>());
            assert!(tracker.supersede());
            pending.await
        };

        assert!(outcome.is_err());
        assert!(!tracker.supersede());
        assert_eq!(tracker.stats().superseded, 1);
        assert_eq!(
            endpoint.sent_tags(),
            vec![EventTag::RenderStart, EventTag::RenderComplete]
        );
    }
}
