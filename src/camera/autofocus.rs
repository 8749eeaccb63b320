// SPDX-License-Identifier: GPL-3.0-only

//! Periodic auto-focus on a dedicated thread
//!
//! The thread parks on a channel with a timeout. A timeout or an explicit
//! trigger issues one focus attempt; `Stop` ends the loop. Stopping always
//! sends a message, so shutdown never waits for the interval to elapse.

use super::{AutoFocusCallback, FocusControl};
use crate::errors::{CameraError, CameraResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

enum FocusMessage {
    Trigger,
    Stop,
}

type SharedCallback = Arc<Mutex<Option<AutoFocusCallback>>>;

/// Runs focus attempts against one device until stopped
///
/// A stopped loop cannot be restarted; create a new one instead.
pub struct AutoFocusLoop {
    sender: Sender<FocusMessage>,
    handle: Option<JoinHandle<()>>,
    stopped: Arc<AtomicBool>,
    callback: SharedCallback,
    focus: Arc<dyn FocusControl>,
    attempts: Arc<AtomicU64>,
}

impl std::fmt::Debug for AutoFocusLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoFocusLoop")
            .field("running", &self.is_running())
            .field("attempts", &self.attempts())
            .finish()
    }
}

impl AutoFocusLoop {
    pub fn start(focus: Arc<dyn FocusControl>, interval: Duration) -> CameraResult<Self> {
        let (sender, receiver) = mpsc::channel();
        let stopped = Arc::new(AtomicBool::new(false));
        let callback: SharedCallback = Arc::new(Mutex::new(None));
        let attempts = Arc::new(AtomicU64::new(0));

        let thread_focus = Arc::clone(&focus);
        let thread_stopped = Arc::clone(&stopped);
        let thread_callback = Arc::clone(&callback);
        let thread_attempts = Arc::clone(&attempts);

        let handle = thread::Builder::new()
            .name("auto-focus".to_string())
            .spawn(move || {
                debug!(interval_ms = interval.as_millis() as u64, "Auto-focus thread started");
                loop {
                    match receiver.recv_timeout(interval) {
                        Ok(FocusMessage::Trigger) | Err(RecvTimeoutError::Timeout) => {}
                        Ok(FocusMessage::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if thread_stopped.load(Ordering::SeqCst) {
                        break;
                    }
                    thread_attempts.fetch_add(1, Ordering::SeqCst);
                    let callback = Arc::clone(&thread_callback);
                    thread_focus.auto_focus(Box::new(move |success| {
                        debug!(success, "Auto-focus finished");
                        let current = callback
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .clone();
                        if let Some(callback) = current {
                            callback(success);
                        }
                    }));
                }
                debug!("Auto-focus thread exiting");
            })
            .map_err(|e| CameraError::BackendError(format!("auto-focus thread: {e}")))?;

        info!(interval_ms = interval.as_millis() as u64, "Auto-focus started");

        Ok(Self {
            sender,
            handle: Some(handle),
            stopped,
            callback,
            focus,
            attempts,
        })
    }

    /// Focus now instead of waiting for the interval
    pub fn trigger(&self) {
        if self.is_running() {
            let _ = self.sender.send(FocusMessage::Trigger);
        }
    }

    /// Receive the result of every later focus attempt
    pub fn set_callback(&self, callback: Option<AutoFocusCallback>) {
        *self
            .callback
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = callback;
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    /// Focus attempts issued so far
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Drop the callback, join the thread and cancel the in-flight focus
    pub fn stop(&mut self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_callback(None);
        let _ = self.sender.send(FocusMessage::Stop);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("Auto-focus thread panicked");
        }
        // No attempt can start once the thread is joined
        self.focus.cancel_auto_focus();
        info!(attempts = self.attempts(), "Auto-focus stopped");
    }
}

impl Drop for AutoFocusLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[derive(Default)]
    struct CountingFocus {
        focused: AtomicU64,
        cancelled: AtomicU64,
    }

    impl FocusControl for CountingFocus {
        fn auto_focus(&self, done: Box<dyn FnOnce(bool) + Send>) {
            self.focused.fetch_add(1, Ordering::SeqCst);
            done(true);
        }

        fn cancel_auto_focus(&self) {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn trigger_focuses_and_forwards_result() {
        let focus = Arc::new(CountingFocus::default());
        let results = Arc::new(Mutex::new(Vec::new()));
        let mut af = AutoFocusLoop::start(focus.clone(), Duration::from_secs(60)).unwrap();
        let sink = Arc::clone(&results);
        af.set_callback(Some(Arc::new(move |ok| sink.lock().unwrap().push(ok))));
        af.trigger();
        assert!(wait_for(|| results.lock().unwrap().len() == 1));
        assert_eq!(focus.focused.load(Ordering::SeqCst), 1);
        af.stop();
    }

    #[test]
    fn stop_wakes_without_waiting_for_interval() {
        let focus = Arc::new(CountingFocus::default());
        let mut af = AutoFocusLoop::start(focus.clone(), Duration::from_secs(3600)).unwrap();
        let started = Instant::now();
        af.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!af.is_running());
        assert_eq!(focus.cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(focus.focused.load(Ordering::SeqCst), 0);
        af.stop();
        assert_eq!(focus.cancelled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn interval_elapses_into_attempts() {
        let focus = Arc::new(CountingFocus::default());
        let af = AutoFocusLoop::start(focus.clone(), Duration::from_millis(10)).unwrap();
        assert!(wait_for(|| af.attempts() >= 2));
    }
}
