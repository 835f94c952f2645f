//! Named OS threads with optional CPU pinning.
//!
//! The launcher waits for the new thread to report whether pinning worked
//! before returning, so a failed pin is seen by the caller and the thread body
//! never runs on the wrong core.

use std::thread::{self, JoinHandle, Thread};

use crossbeam_channel::bounded;

#[derive(Debug, thiserror::Error)]
pub enum ThreadError {
    #[error("failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to pin thread '{name}' to core {core}: {reason}")]
    Affinity {
        name: String,
        core: usize,
        reason: String,
    },

    #[error("CPU affinity is not supported on this platform")]
    AffinityUnsupported,

    #[error("thread '{name}' exited without running its body")]
    Vanished { name: String },

    #[error("thread '{name}' panicked")]
    Panicked { name: String },
}

fn current_name() -> String {
    thread::current().name().unwrap_or("<unnamed>").to_string()
}

/// Pin the calling thread to `core`.
#[cfg(target_os = "linux")]
pub fn set_thread_core(core: usize) -> Result<(), ThreadError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let affinity_err = |e: nix::Error| ThreadError::Affinity {
        name: current_name(),
        core,
        reason: e.to_string(),
    };

    let mut set = CpuSet::new();
    set.set(core).map_err(affinity_err)?;
    // Pid 0 targets the calling thread.
    sched_setaffinity(Pid::from_raw(0), &set).map_err(affinity_err)
}

#[cfg(not(target_os = "linux"))]
pub fn set_thread_core(_core: usize) -> Result<(), ThreadError> {
    Err(ThreadError::AffinityUnsupported)
}

/// Cores the calling thread is currently allowed to run on.
#[cfg(target_os = "linux")]
pub fn allowed_cores() -> Vec<usize> {
    use nix::sched::{CpuSet, sched_getaffinity};
    use nix::unistd::Pid;

    match sched_getaffinity(Pid::from_raw(0)) {
        Ok(set) => (0..CpuSet::count())
            .filter(|&core| set.is_set(core).unwrap_or(false))
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read CPU affinity");
            Vec::new()
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn allowed_cores() -> Vec<usize> {
    Vec::new()
}

/// Handle to a thread started by [`create_and_start_thread`].
#[derive(Debug)]
pub struct ThreadHandle<R> {
    name: String,
    core: Option<usize>,
    // `None` only if the body was skipped, which the launcher never hands out.
    inner: JoinHandle<Option<R>>,
}

impl<R> ThreadHandle<R> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Core the thread is pinned to, if any.
    pub fn core(&self) -> Option<usize> {
        self.core
    }

    pub fn thread(&self) -> &Thread {
        self.inner.thread()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Wait for the thread and return what its body returned.
    pub fn join(self) -> Result<R, ThreadError> {
        match self.inner.join() {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(ThreadError::Vanished { name: self.name }),
            Err(_) => Err(ThreadError::Panicked { name: self.name }),
        }
    }
}

/// Start `body` on a new named thread, pinned to `core` when given.
///
/// Returns once the thread has applied its affinity. If pinning fails the body
/// is dropped without running and the error is returned here.
pub fn create_and_start_thread<F, R>(
    core: Option<usize>,
    name: &str,
    body: F,
) -> Result<ThreadHandle<R>, ThreadError>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (ack_tx, ack_rx) = bounded::<Result<(), ThreadError>>(1);

    let inner = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let pinned = match core {
                Some(core) => set_thread_core(core),
                None => Ok(()),
            };
            let run = pinned.is_ok();
            // The launcher is blocked on this ack; it only disappears if the
            // launching thread itself died.
            let _ = ack_tx.send(pinned);
            if run { Some(body()) } else { None }
        })
        .map_err(|source| ThreadError::Spawn {
            name: name.to_string(),
            source,
        })?;

    match ack_rx.recv() {
        Ok(Ok(())) => {
            tracing::info!(thread = name, ?core, "Started thread");
            Ok(ThreadHandle {
                name: name.to_string(),
                core,
                inner,
            })
        }
        Ok(Err(e)) => {
            tracing::error!(thread = name, ?core, error = %e, "Failed to set core affinity");
            let _ = inner.join();
            Err(e)
        }
        Err(_) => {
            let _ = inner.join();
            Err(ThreadError::Vanished {
                name: name.to_string(),
            })
        }
    }
}
