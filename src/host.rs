// src/host.rs
//! Host integration for the presentation path.
//!
//! Window surfaces are backed by native objects owned by the host UI
//! system, and some of their queries may only run on the host's main
//! context. The display reaches that context through an injected
//! [`MainThreadScheduler`]; when the caller is not already on it the work is
//! dispatched synchronously and the caller blocks, without timeout, until it
//! has run.

use log::trace;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use crate::error::{Result, SurfacelessError};

/// Opaque handle of a host-native surface (a layer, a window, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeSurface(pub usize);

/// Host-side surface operations. Both calls run on the main context.
pub trait PresentationHost: Send + Sync {
    /// Returns a handle the driver can present to. Hosts may substitute a
    /// presentation-capable object for the one they were given.
    fn prepare_surface(&self, native: NativeSurface) -> NativeSurface;

    /// Drawable size of `native` in pixels.
    fn drawable_size(&self, native: NativeSurface) -> (u32, u32);
}

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Access to the host's main execution context.
pub trait MainThreadScheduler: Send + Sync {
    fn is_main_thread(&self) -> bool;

    /// Runs `job` on the main context and returns once it has completed.
    fn dispatch_sync(&self, job: Job) -> Result<()>;
}

/// Runs `f` on the main context and returns its result.
pub fn run_on_main<T, F>(scheduler: &dyn MainThreadScheduler, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    if scheduler.is_main_thread() {
        return Ok(f());
    }
    let (tx, rx) = mpsc::channel();
    scheduler.dispatch_sync(Box::new(move || {
        let _ = tx.send(f());
    }))?;
    rx.recv().map_err(|_| SurfacelessError::SchedulerDisconnected)
}

/// Treats every caller as the main context.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineScheduler;

impl MainThreadScheduler for InlineScheduler {
    fn is_main_thread(&self) -> bool {
        true
    }

    fn dispatch_sync(&self, job: Job) -> Result<()> {
        job();
        Ok(())
    }
}

/// A main context driven by the thread that created the scheduler, which
/// must call [`ThreadScheduler::pump`] regularly.
pub struct ThreadScheduler {
    main: ThreadId,
    tx: Sender<(Job, SyncSender<()>)>,
    rx: Mutex<Receiver<(Job, SyncSender<()>)>>,
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadScheduler {
    /// The calling thread becomes the main context.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            main: thread::current().id(),
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Runs every queued job. Returns how many ran.
    pub fn pump(&self) -> usize {
        let rx = match self.rx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut ran = 0;
        while let Ok((job, done)) = rx.try_recv() {
            job();
            let _ = done.send(());
            ran += 1;
        }
        if ran > 0 {
            trace!("ThreadScheduler: ran {} main-thread job(s)", ran);
        }
        ran
    }
}

impl MainThreadScheduler for ThreadScheduler {
    fn is_main_thread(&self) -> bool {
        thread::current().id() == self.main
    }

    fn dispatch_sync(&self, job: Job) -> Result<()> {
        if self.is_main_thread() {
            job();
            return Ok(());
        }
        let (done_tx, done_rx) = mpsc::sync_channel(1);
        self.tx
            .send((job, done_tx))
            .map_err(|_| SurfacelessError::SchedulerDisconnected)?;
        done_rx
            .recv()
            .map_err(|_| SurfacelessError::SchedulerDisconnected)
    }
}

/// Everything the display needs to present window surfaces.
#[derive(Clone)]
pub struct HostIntegration {
    pub host: Arc<dyn PresentationHost>,
    pub scheduler: Arc<dyn MainThreadScheduler>,
}

impl HostIntegration {
    pub fn new(host: Arc<dyn PresentationHost>, scheduler: Arc<dyn MainThreadScheduler>) -> Self {
        Self { host, scheduler }
    }

    pub fn drawable_size(&self, native: NativeSurface) -> Result<(u32, u32)> {
        let host = Arc::clone(&self.host);
        run_on_main(self.scheduler.as_ref(), move || host.drawable_size(native))
    }

    pub fn prepare_surface(&self, native: NativeSurface) -> Result<NativeSurface> {
        let host = Arc::clone(&self.host);
        run_on_main(self.scheduler.as_ref(), move || host.prepare_surface(native))
    }
}

impl std::fmt::Debug for HostIntegration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostIntegration").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use test_log::test;

    #[test]
    fn inline_scheduler_runs_in_place() {
        let value = run_on_main(&InlineScheduler, || 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn main_thread_caller_does_not_need_a_pump() {
        let scheduler = ThreadScheduler::new();
        assert!(scheduler.is_main_thread());
        assert_eq!(run_on_main(&scheduler, || "inline").unwrap(), "inline");
        assert_eq!(scheduler.pump(), 0);
    }

    #[test]
    fn worker_blocks_until_main_thread_pumps() {
        let scheduler = Arc::new(ThreadScheduler::new());
        let ran_on_main = Arc::new(AtomicBool::new(false));
        let main_id = thread::current().id();

        let worker = {
            let scheduler = Arc::clone(&scheduler);
            let ran_on_main = Arc::clone(&ran_on_main);
            thread::spawn(move || {
                assert!(!scheduler.is_main_thread());
                run_on_main(scheduler.as_ref(), move || {
                    ran_on_main.store(thread::current().id() == main_id, Ordering::SeqCst);
                    (1920u32, 1080u32)
                })
            })
        };

        while !worker.is_finished() {
            scheduler.pump();
            thread::yield_now();
        }
        assert_eq!(worker.join().unwrap().unwrap(), (1920, 1080));
        assert!(ran_on_main.load(Ordering::SeqCst));
    }
}
