//! session — camera acquisition with a liveness check
//!
//! Opening a camera can take a while (permission prompts, device negotiation),
//! so acquisition runs on its own thread. The session can be torn down at any
//! point; a stream that arrives after teardown is stopped on the spot and
//! never handed to the perception loop.
//!
//! Acquisition is attempted exactly once per session. A failure is terminal
//! and is kept as the session status for the UI to display.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::runtime::CancelFlag;
use crate::video::FrameSource;

pub type BoxedSource = Box<dyn FrameSource + Send>;

/// Why the camera could not be opened. `Display` is the user-facing text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquisitionError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("camera is in use by another application")]
    DeviceBusy,
    #[error("no camera available: {0}")]
    Unavailable(String),
    #[error("camera initialisation failed ({name}): {reason}")]
    Other { name: String, reason: String },
}

impl AcquisitionError {
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => AcquisitionError::PermissionDenied,
            io::ErrorKind::ResourceBusy => AcquisitionError::DeviceBusy,
            io::ErrorKind::NotFound => AcquisitionError::Unavailable(err.to_string()),
            kind => AcquisitionError::Other {
                name: format!("{kind:?}"),
                reason: err.to_string(),
            },
        }
    }

    /// Classify an error chain, looking for an underlying I/O error.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        match err.chain().find_map(|e| e.downcast_ref::<io::Error>()) {
            Some(io_err) => Self::from_io(io_err),
            None => AcquisitionError::Other {
                name: "Error".to_string(),
                reason: format!("{err:#}"),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Initializing,
    Active,
    Failed(AcquisitionError),
    Closed,
}

struct Shared {
    alive: bool,
    status: SessionStatus,
    source: Option<BoxedSource>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct CameraSession {
    shared: Arc<Mutex<Shared>>,
    cancel: CancelFlag,
    handle: Option<JoinHandle<()>>,
}

impl CameraSession {
    /// Begin acquiring a camera in the background.
    pub fn start<F>(acquire: F) -> Result<Self>
    where
        F: FnOnce() -> std::result::Result<BoxedSource, AcquisitionError> + Send + 'static,
    {
        let shared = Arc::new(Mutex::new(Shared {
            alive: true,
            status: SessionStatus::Initializing,
            source: None,
        }));

        let worker = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("camera-acquire".into())
            .spawn(move || {
                let result = acquire();
                let mut guard = lock(&worker);

                if !guard.alive {
                    if let Ok(mut stream) = result {
                        stream.stop();
                        debug!("camera stream arrived after teardown; released");
                    }
                    return;
                }

                match result {
                    Ok(stream) => {
                        guard.source = Some(stream);
                        guard.status = SessionStatus::Active;
                        info!("camera connected");
                    }
                    Err(e) => {
                        error!(error = %e, "camera acquisition failed");
                        guard.status = SessionStatus::Failed(e);
                    }
                }
            })
            .context("failed to spawn camera acquisition thread")?;

        Ok(Self {
            shared,
            cancel: CancelFlag::new(),
            handle: Some(handle),
        })
    }

    pub fn status(&self) -> SessionStatus {
        lock(&self.shared).status.clone()
    }

    /// Block until the acquisition attempt has finished (successfully or not).
    pub fn wait_acquired(&mut self) -> SessionStatus {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                let mut guard = lock(&self.shared);
                if guard.status == SessionStatus::Initializing {
                    guard.status = SessionStatus::Failed(AcquisitionError::Other {
                        name: "Panic".to_string(),
                        reason: "camera acquisition thread panicked".to_string(),
                    });
                }
            }
        }
        self.status()
    }

    /// Hand the acquired stream to the perception loop. Only succeeds once,
    /// and only while the session is alive.
    pub fn take_source(&self) -> Option<BoxedSource> {
        let mut guard = lock(&self.shared);
        if !guard.alive {
            return None;
        }
        guard.source.take()
    }

    /// Flag shared with the loop driver; cancelled by [`close`](Self::close).
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn is_alive(&self) -> bool {
        lock(&self.shared).alive
    }

    /// Tear the session down. Safe to call while acquisition is in flight.
    pub fn close(&mut self) {
        let mut guard = lock(&self.shared);
        if !guard.alive {
            return;
        }
        guard.alive = false;
        self.cancel.cancel();
        if let Some(mut stream) = guard.source.take() {
            stream.stop();
        }
        guard.status = SessionStatus::Closed;
        info!("camera session closed");
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::SyntheticSource;

    #[test]
    fn io_errors_map_to_taxonomy() {
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert_eq!(
            AcquisitionError::from_io(&denied),
            AcquisitionError::PermissionDenied
        );

        let busy = io::Error::from(io::ErrorKind::ResourceBusy);
        assert_eq!(AcquisitionError::from_io(&busy), AcquisitionError::DeviceBusy);

        let missing = io::Error::new(io::ErrorKind::NotFound, "/dev/video0");
        assert!(matches!(
            AcquisitionError::from_io(&missing),
            AcquisitionError::Unavailable(_)
        ));

        let weird = io::Error::new(io::ErrorKind::Other, "boom");
        assert!(matches!(
            AcquisitionError::from_io(&weird),
            AcquisitionError::Other { .. }
        ));
    }

    #[test]
    fn anyhow_chain_is_searched_for_io_errors() {
        let err = anyhow::Error::new(io::Error::from(io::ErrorKind::PermissionDenied))
            .context("could not open input");
        assert_eq!(
            AcquisitionError::from_anyhow(&err),
            AcquisitionError::PermissionDenied
        );

        let plain = anyhow::anyhow!("codec missing");
        assert!(AcquisitionError::from_anyhow(&plain)
            .to_string()
            .contains("codec missing"));
    }

    #[test]
    fn successful_acquisition_hands_over_source_once() {
        let mut session =
            CameraSession::start(|| Ok(Box::new(SyntheticSource::new(64, 48)) as BoxedSource))
                .unwrap();
        assert_eq!(session.wait_acquired(), SessionStatus::Active);
        assert!(session.take_source().is_some());
        assert!(session.take_source().is_none());
    }

    #[test]
    fn failure_is_terminal_and_reported() {
        let mut session =
            CameraSession::start(|| Err(AcquisitionError::DeviceBusy)).unwrap();
        assert_eq!(
            session.wait_acquired(),
            SessionStatus::Failed(AcquisitionError::DeviceBusy)
        );
        assert!(session.take_source().is_none());
        assert_eq!(
            AcquisitionError::DeviceBusy.to_string(),
            "camera is in use by another application"
        );
    }

    #[test]
    fn close_cancels_the_loop_and_blocks_handover() {
        let mut session =
            CameraSession::start(|| Ok(Box::new(SyntheticSource::new(64, 48)) as BoxedSource))
                .unwrap();
        session.wait_acquired();
        let cancel = session.cancel_flag();
        session.close();
        assert!(cancel.is_cancelled());
        assert!(!session.is_alive());
        assert_eq!(session.status(), SessionStatus::Closed);
        assert!(session.take_source().is_none());
    }
}
