//! Unit tests for window redraw handling
//!
//! A recording surface stands in for the compositor; buffers are backed by
//! real files in a temporary directory.

use super::*;
use std::cell::RefCell;
use std::os::fd::BorrowedFd;
use std::path::Path;
use std::rc::Rc;
use tempfile::tempdir;

#[derive(Debug, Clone, PartialEq)]
enum Op {
    Create { id: u32, width: u32, height: u32 },
    Destroy(u32),
    Attach(u32),
    Damage(u32, u32),
    Frame,
    Commit,
    DestroySurface,
}

struct RecordingSurface {
    log: Rc<RefCell<Vec<Op>>>,
    next_id: u32,
}

impl BufferFactory for RecordingSurface {
    type Buffer = u32;

    fn create_buffer(&mut self, _: BorrowedFd<'_>, geometry: &BufferGeometry, _: usize) -> u32 {
        self.next_id += 1;
        self.log.borrow_mut().push(Op::Create {
            id: self.next_id,
            width: geometry.width,
            height: geometry.height,
        });
        self.next_id
    }

    fn destroy_buffer(&mut self, buffer: u32) {
        self.log.borrow_mut().push(Op::Destroy(buffer));
    }
}

impl SurfaceProtocol for RecordingSurface {
    fn attach(&mut self, buffer: &u32) {
        self.log.borrow_mut().push(Op::Attach(*buffer));
    }

    fn damage(&mut self, width: u32, height: u32) {
        self.log.borrow_mut().push(Op::Damage(width, height));
    }

    fn request_frame(&mut self) {
        self.log.borrow_mut().push(Op::Frame);
    }

    fn commit(&mut self) {
        self.log.borrow_mut().push(Op::Commit);
    }

    fn destroy(&mut self) {
        self.log.borrow_mut().push(Op::DestroySurface);
    }
}

type Log = Rc<RefCell<Vec<Op>>>;
type Paints = Rc<RefCell<Vec<(u32, u32, usize)>>>;

fn window(dir: &Path, width: u32, height: u32) -> (Window<RecordingSurface>, Log, Paints) {
    let log = Log::default();
    let paints = Paints::default();
    let surface = RecordingSurface {
        log: log.clone(),
        next_id: 0,
    };
    let recorded = paints.clone();
    let painter = move |frame: &mut Frame<'_>| {
        let len = frame.pixels_mut().len();
        frame.fill(0xff20_4080);
        recorded
            .borrow_mut()
            .push((frame.width(), frame.height(), len));
    };
    let pool = ShmBufferPool::new(dir, PixelFormat::Argb8888);
    (
        Window::new(surface, width, height, pool, Box::new(painter)),
        log,
        paints,
    )
}

fn take(log: &Log) -> Vec<Op> {
    std::mem::take(&mut *log.borrow_mut())
}

#[test]
fn test_first_redraw_paints_and_commits() {
    let dir = tempdir().unwrap();
    let (mut window, log, paints) = window(dir.path(), 200, 200);

    window.schedule_redraw();

    assert_eq!(*paints.borrow(), vec![(200, 200, 200 * 200)]);
    assert_eq!(
        take(&log),
        vec![
            Op::Create {
                id: 1,
                width: 200,
                height: 200
            },
            Op::Attach(1),
            Op::Frame,
            Op::Damage(200, 200),
            Op::Commit,
        ]
    );
    assert_eq!(window.frame_state(), FrameState::Rendering);
    assert_eq!(window.pool().busy_count(), 1);

    window.frame_done();
    assert_eq!(window.frame_state(), FrameState::Idle);
    assert!(take(&log).is_empty());
}

#[test]
fn test_redraw_during_frame_is_deferred_once() {
    let dir = tempdir().unwrap();
    let (mut window, _log, paints) = window(dir.path(), 200, 200);

    window.schedule_redraw();
    window.schedule_redraw();
    window.schedule_redraw();
    assert_eq!(window.frame_state(), FrameState::RenderPending);
    assert_eq!(paints.borrow().len(), 1);

    window.frame_done();
    assert_eq!(paints.borrow().len(), 2);
    assert_eq!(window.frame_state(), FrameState::Rendering);

    window.frame_done();
    assert_eq!(paints.borrow().len(), 2);
    assert_eq!(window.frame_state(), FrameState::Idle);
}

#[test]
fn test_same_buffer_is_not_reattached() {
    let dir = tempdir().unwrap();
    let (mut window, log, _paints) = window(dir.path(), 50, 50);

    window.schedule_redraw();
    window.buffer_released(0);
    window.frame_done();
    take(&log);

    window.schedule_redraw();
    assert_eq!(take(&log), vec![Op::Frame, Op::Damage(50, 50), Op::Commit]);
}

#[test]
fn test_other_buffer_is_attached_while_first_is_busy() {
    let dir = tempdir().unwrap();
    let (mut window, log, _paints) = window(dir.path(), 50, 50);

    window.schedule_redraw();
    window.frame_done();
    take(&log);

    window.schedule_redraw();
    assert_eq!(
        take(&log),
        vec![
            Op::Create {
                id: 2,
                width: 50,
                height: 50
            },
            Op::Attach(2),
            Op::Frame,
            Op::Damage(50, 50),
            Op::Commit,
        ]
    );
    assert_eq!(window.pool().busy_count(), 2);
}

#[test]
fn test_configure_resizes_with_fresh_memory() {
    let dir = tempdir().unwrap();
    let (mut window, log, paints) = window(dir.path(), 200, 200);

    window.schedule_redraw();
    window.buffer_released(0);
    window.frame_done();
    take(&log);

    window.configure(400, 300);
    assert_eq!((window.width(), window.height()), (400, 300));
    assert_eq!(paints.borrow().last(), Some(&(400, 300, 400 * 300)));
    assert_eq!(
        take(&log),
        vec![
            Op::Destroy(1),
            Op::Create {
                id: 2,
                width: 400,
                height: 300
            },
            Op::Attach(2),
            Op::Frame,
            Op::Damage(400, 300),
            Op::Commit,
        ]
    );
}

#[test]
fn test_configure_during_frame_renders_once_at_new_size() {
    let dir = tempdir().unwrap();
    let (mut window, _log, paints) = window(dir.path(), 200, 200);

    window.schedule_redraw();
    window.configure(320, 240);
    window.configure(640, 480);
    assert_eq!(paints.borrow().len(), 1);

    window.frame_done();
    assert_eq!(paints.borrow().len(), 2);
    assert_eq!(paints.borrow()[1], (640, 480, 640 * 480));
}

#[test]
fn test_configure_with_zero_keeps_size() {
    let dir = tempdir().unwrap();
    let (mut window, _log, paints) = window(dir.path(), 120, 80);

    window.configure(0, 0);
    window.frame_done();
    window.configure(-1, 90);

    assert_eq!((window.width(), window.height()), (120, 90));
    assert_eq!(paints.borrow()[0], (120, 80, 120 * 80));
}

#[test]
fn test_both_buffers_busy_abandons_then_retries_on_release() {
    let dir = tempdir().unwrap();
    let (mut window, _log, paints) = window(dir.path(), 30, 30);

    window.schedule_redraw();
    window.frame_done();
    window.schedule_redraw();
    window.frame_done();
    assert_eq!(window.pool().busy_count(), 2);

    window.schedule_redraw();
    assert_eq!(paints.borrow().len(), 2);
    assert_eq!(window.frame_state(), FrameState::Idle);
    assert_eq!(window.stats().renders_abandoned, 1);

    window.buffer_released(1);
    assert_eq!(paints.borrow().len(), 3);
    assert_eq!(window.frame_state(), FrameState::Rendering);

    // Further releases do not render again
    window.buffer_released(0);
    assert_eq!(paints.borrow().len(), 3);
}

#[test]
fn test_allocation_failure_is_retried_on_next_redraw() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("later");
    let (mut window, log, paints) = window(&missing, 10, 10);

    window.schedule_redraw();
    assert!(paints.borrow().is_empty());
    assert!(take(&log).is_empty());
    assert_eq!(window.frame_state(), FrameState::Idle);

    std::fs::create_dir(&missing).unwrap();
    window.schedule_redraw();
    assert_eq!(paints.borrow().len(), 1);
}

#[test]
fn test_spurious_frame_done_does_not_paint() {
    let dir = tempdir().unwrap();
    let (mut window, log, paints) = window(dir.path(), 10, 10);

    window.frame_done();
    assert!(paints.borrow().is_empty());
    assert!(take(&log).is_empty());
    assert_eq!(window.stats().spurious_completions, 1);
}

#[test]
fn test_unconfigured_window_waits_for_configure() {
    let dir = tempdir().unwrap();
    let (mut window, _log, paints) = window(dir.path(), 10, 10);
    window.await_configure();

    window.schedule_redraw();
    assert!(paints.borrow().is_empty());

    window.configure(64, 48);
    assert!(window.is_configured());
    assert_eq!(*paints.borrow(), vec![(64, 48, 64 * 48)]);
}

#[test]
fn test_drop_destroys_buffers_then_surface() {
    let dir = tempdir().unwrap();
    let (mut window, log, _paints) = window(dir.path(), 10, 10);

    window.schedule_redraw();
    window.frame_done();
    window.schedule_redraw();
    take(&log);

    drop(window);
    assert_eq!(
        take(&log),
        vec![Op::Destroy(1), Op::Destroy(2), Op::DestroySurface]
    );
}
