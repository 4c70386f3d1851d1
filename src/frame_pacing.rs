//! Frame Pacing
//!
//! Serialises redraws against the server's frame-completion events so that
//! at most one frame is in flight per window.
//!
//! # States
//!
//! - **Idle**: nothing committed, nothing requested
//! - **Rendering**: a frame was committed and its completion is outstanding
//! - **RenderPending**: a redraw was requested while Rendering; exactly one
//!   render pass runs when the outstanding frame completes
//!
//! The pacer only decides *when* to render. The window performs the render
//! pass and reports back with [`FramePacer::render_committed`] or
//! [`FramePacer::render_abandoned`].
//!
//! # Usage
//!
//! ```
//! use shmwin::frame_pacing::{FrameDone, FramePacer, FrameState};
//!
//! let mut pacer = FramePacer::new();
//! if pacer.schedule_redraw() {
//!     // paint, attach, request a frame callback, commit
//!     pacer.render_committed();
//! }
//! assert!(!pacer.schedule_redraw());
//! assert_eq!(pacer.state(), FrameState::RenderPending);
//!
//! assert_eq!(pacer.frame_done(), FrameDone::Render);
//! ```

use log::{debug, error, trace};

/// Pacing state of one window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameState {
    #[default]
    Idle,
    Rendering,
    RenderPending,
}

/// What the window must do after a frame-completion event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDone {
    /// A redraw was requested meanwhile; run one render pass now
    Render,
    /// Nothing to do, the window is idle
    Idle,
    /// Completion arrived with no frame outstanding; ignored
    Spurious,
}

/// Counters describing pacing behaviour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames committed to the server
    pub frames_committed: u64,
    /// Redraw requests folded into an already pending one
    pub redraws_coalesced: u64,
    /// Render passes dropped because no buffer was available
    pub renders_abandoned: u64,
    /// Completion events received while idle
    pub spurious_completions: u64,
}

/// Per-window redraw state machine
#[derive(Debug, Default)]
pub struct FramePacer {
    state: FrameState,
    /// A render pass was abandoned and is still owed
    starved: bool,
    stats: FrameStats,
}

impl FramePacer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// True when a render pass was abandoned and nothing is in flight to
    /// trigger the retry.
    pub fn is_starved(&self) -> bool {
        self.starved && self.state == FrameState::Idle
    }

    /// Request a redraw. Returns `true` if the caller must render now.
    pub fn schedule_redraw(&mut self) -> bool {
        match self.state {
            FrameState::Idle => {
                self.starved = false;
                true
            }
            FrameState::Rendering => {
                trace!("redraw deferred until frame completes");
                self.state = FrameState::RenderPending;
                false
            }
            FrameState::RenderPending => {
                self.stats.redraws_coalesced += 1;
                false
            }
        }
    }

    /// Handle the server's frame-completion event.
    ///
    /// A completion while idle cannot happen with a single outstanding
    /// frame callback. It is logged, counted and otherwise ignored.
    pub fn frame_done(&mut self) -> FrameDone {
        match self.state {
            FrameState::Rendering => {
                self.state = FrameState::Idle;
                FrameDone::Idle
            }
            FrameState::RenderPending => {
                self.state = FrameState::Idle;
                FrameDone::Render
            }
            FrameState::Idle => {
                error!("frame completion received with no frame outstanding");
                self.stats.spurious_completions += 1;
                FrameDone::Spurious
            }
        }
    }

    /// The render pass committed a frame and registered a completion callback.
    pub fn render_committed(&mut self) {
        self.state = FrameState::Rendering;
        self.starved = false;
        self.stats.frames_committed += 1;
    }

    /// The render pass found no buffer. The redraw stays owed until the next
    /// opportunity to retry it.
    pub fn render_abandoned(&mut self) {
        debug!("render pass abandoned, no buffer available");
        self.state = FrameState::Idle;
        self.starved = true;
        self.stats.renders_abandoned += 1;
    }

    /// Take an owed redraw if one exists and nothing is in flight.
    pub fn take_starved(&mut self) -> bool {
        if self.is_starved() {
            self.starved = false;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_first_redraw_renders_immediately() {
        let mut pacer = FramePacer::new();
        assert_eq!(pacer.state(), FrameState::Idle);
        assert!(pacer.schedule_redraw());
        pacer.render_committed();
        assert_eq!(pacer.state(), FrameState::Rendering);
    }

    #[test]
    fn test_completion_without_pending_returns_to_idle() {
        let mut pacer = FramePacer::new();
        assert!(pacer.schedule_redraw());
        pacer.render_committed();

        assert_eq!(pacer.frame_done(), FrameDone::Idle);
        assert_eq!(pacer.state(), FrameState::Idle);
    }

    #[test]
    fn test_redraws_while_rendering_are_coalesced() {
        let mut pacer = FramePacer::new();
        assert!(pacer.schedule_redraw());
        pacer.render_committed();

        for _ in 0..5 {
            assert!(!pacer.schedule_redraw());
        }
        assert_eq!(pacer.state(), FrameState::RenderPending);
        assert_eq!(pacer.stats().redraws_coalesced, 4);

        assert_eq!(pacer.frame_done(), FrameDone::Render);
        pacer.render_committed();
        assert_eq!(pacer.frame_done(), FrameDone::Idle);
    }

    #[test]
    fn test_spurious_completion_is_ignored() {
        let mut pacer = FramePacer::new();
        assert_eq!(pacer.frame_done(), FrameDone::Spurious);
        assert_eq!(pacer.state(), FrameState::Idle);
        assert_eq!(pacer.stats().spurious_completions, 1);

        // Still usable afterwards
        assert!(pacer.schedule_redraw());
    }

    #[test]
    fn test_abandoned_render_is_owed() {
        let mut pacer = FramePacer::new();
        assert!(pacer.schedule_redraw());
        pacer.render_abandoned();

        assert_eq!(pacer.state(), FrameState::Idle);
        assert!(pacer.is_starved());
        assert!(pacer.take_starved());
        assert!(!pacer.take_starved());
    }

    #[test]
    fn test_explicit_redraw_clears_starvation() {
        let mut pacer = FramePacer::new();
        assert!(pacer.schedule_redraw());
        pacer.render_abandoned();

        assert!(pacer.schedule_redraw());
        pacer.render_committed();
        assert!(!pacer.is_starved());
        assert_eq!(pacer.stats().renders_abandoned, 1);
        assert_eq!(pacer.stats().frames_committed, 1);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Redraw,
        Complete,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![Just(Step::Redraw), Just(Step::Complete)]
    }

    proptest! {
        #[test]
        fn prop_at_most_one_frame_outstanding(steps in prop::collection::vec(step(), 0..64)) {
            let mut pacer = FramePacer::new();
            let mut outstanding = 0u32;
            let mut renders_since_completion = 0u32;

            for step in steps {
                match step {
                    Step::Redraw => {
                        if pacer.schedule_redraw() {
                            pacer.render_committed();
                            outstanding += 1;
                            renders_since_completion += 1;
                        }
                    }
                    Step::Complete => {
                        if outstanding == 0 {
                            continue;
                        }
                        outstanding -= 1;
                        renders_since_completion = 0;
                        if pacer.frame_done() == FrameDone::Render {
                            pacer.render_committed();
                            outstanding += 1;
                            renders_since_completion += 1;
                        }
                    }
                }
                prop_assert!(outstanding <= 1);
                prop_assert!(renders_since_completion <= 1);
                prop_assert_eq!(outstanding == 0, pacer.state() == FrameState::Idle);
            }
        }
    }
}
