use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};

use anyhow::Result;
use shoebot_core::config::TrackerConfig;
use shoebot_core::detection::ChangeDetector;
use shoebot_core::pipeline::Pipeline;
use shoebot_core::runtime::{CountedScheduler, LoopDriver};
use shoebot_core::session::{BoxedSource, CameraSession, SessionStatus};
use shoebot_core::tracking::{LockState, TrackSmoother};
use shoebot_core::video::{FrameSource, RgbaFrame, SyntheticSource};

/// Counts polls and records whether it was stopped.
struct Probe {
    frame: RgbaFrame,
    polls: Arc<AtomicUsize>,
    stopped: Arc<AtomicBool>,
}

impl FrameSource for Probe {
    fn poll_frame(&mut self) -> Result<Option<&RgbaFrame>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(&self.frame))
    }

    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[test]
fn white_block_on_black_acquires_lock() {
    let mut detector = ChangeDetector::new(30, 2);
    let mut smoother = TrackSmoother::new(0.2, 20, 0.2, true);

    let previous = RgbaFrame::filled(128, 96, [0, 0, 0]);
    let cold = detector.detect(&previous);
    assert!(cold.is_empty());
    assert_eq!(smoother.update(&cold, 640, 480).lock, LockState::Unlocked);

    let mut current = RgbaFrame::filled(128, 96, [0, 0, 0]);
    current.fill_rect(40, 40, 60, 60, [255, 255, 255]);
    let extent = detector.detect(&current);

    assert!(extent.changed > 20, "{extent:?}");
    assert_eq!((extent.min_x, extent.min_y), (40, 40));
    assert!(extent.max_x >= 58 && extent.max_x < 60, "{extent:?}");
    assert!(extent.max_y >= 58 && extent.max_y < 60, "{extent:?}");

    let state = smoother.update(&extent, 640, 480);
    assert_eq!(state.lock, LockState::Locked);
    // One blend step from the origin towards (200, 200).
    assert!((state.bbox.x - 40.0).abs() < 1e-3);
    assert!((state.bbox.y - 40.0).abs() < 1e-3);
}

#[test]
fn stream_resolved_after_teardown_is_stopped_unused() {
    let polls = Arc::new(AtomicUsize::new(0));
    let stopped = Arc::new(AtomicBool::new(false));
    let (go, wait) = mpsc::channel::<()>();

    let probe = Probe {
        frame: RgbaFrame::filled(64, 48, [0, 0, 0]),
        polls: Arc::clone(&polls),
        stopped: Arc::clone(&stopped),
    };
    let mut session = CameraSession::start(move || {
        let _ = wait.recv();
        Ok(Box::new(probe) as BoxedSource)
    })
    .unwrap();

    assert_eq!(session.status(), SessionStatus::Initializing);
    session.close();
    go.send(()).unwrap();
    assert_eq!(session.wait_acquired(), SessionStatus::Closed);

    assert!(stopped.load(Ordering::SeqCst));
    assert_eq!(polls.load(Ordering::SeqCst), 0);
    assert!(session.take_source().is_none());
}

#[test]
fn synthetic_session_runs_until_source_finishes() {
    let mut session = CameraSession::start(|| {
        Ok(Box::new(SyntheticSource::new(320, 240).with_warmup(2).with_limit(60)) as BoxedSource)
    })
    .unwrap();
    assert_eq!(session.wait_acquired(), SessionStatus::Active);

    let source = session.take_source().unwrap();
    let pipeline = Pipeline::new(&TrackerConfig::default(), None).unwrap();
    let locked = Rc::new(RefCell::new(0u32));
    let seen = Rc::clone(&locked);

    let mut driver = LoopDriver::new(source, pipeline, session.cancel_flag()).on_summary(
        move |s| {
            if s.locked {
                *seen.borrow_mut() += 1;
            }
        },
    );
    let stats = driver.run(&mut CountedScheduler::new(1_000));

    assert_eq!(stats.skipped, 2);
    assert_eq!(stats.processed, 60);
    assert_eq!(stats.faults, 0);
    assert!(*locked.borrow() > 0);

    session.close();
    assert_eq!(session.status(), SessionStatus::Closed);
}

#[test]
fn closing_the_session_stops_a_running_loop() {
    let mut session =
        CameraSession::start(|| Ok(Box::new(SyntheticSource::new(160, 120)) as BoxedSource))
            .unwrap();
    session.wait_acquired();
    let source = session.take_source().unwrap();
    let pipeline = Pipeline::new(&TrackerConfig::default(), None).unwrap();
    let mut driver = LoopDriver::new(source, pipeline, session.cancel_flag());

    for _ in 0..5 {
        driver.cycle();
    }
    session.close();
    let stats = driver.run(&mut CountedScheduler::new(1_000));
    assert_eq!(stats.cycles, 5);
}
