//! Background cleanup loop: finalizes chunks behind the watermark on a fixed interval,
//! with shutdown coordination and fatal-error handling
use crate::error::{ChunkError, Result};
use crate::layout::ChunkId;
use crate::writer::ChunkWriter;
use log::{debug, error, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Periodic `clean_up` driver for a shared writer
///
/// A `FinalizeConflict` (or any other fatal error) stops the loop; the error is
/// surfaced by `shutdown()`.
pub struct CleanupRuntime {
    shutdown_tx: mpsc::Sender<()>,
    handle: Option<JoinHandle<()>>,
    fatal_error: Arc<AtomicBool>,
    last_error: Arc<Mutex<Option<ChunkError>>>,
}

impl CleanupRuntime {
    /// Start the loop on a dedicated thread
    pub fn spawn(writer: Arc<ChunkWriter>, interval: Duration) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let fatal_error = Arc::new(AtomicBool::new(false));
        let last_error = Arc::new(Mutex::new(None));

        let fatal = Arc::clone(&fatal_error);
        let slot = Arc::clone(&last_error);
        let run_dir = writer.layout().run_dir().to_path_buf();
        let handle = std::thread::Builder::new()
            .name("chunk-cleanup".to_string())
            .spawn(move || {
                loop {
                    match shutdown_rx.recv_timeout(interval) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                    if writer.is_ended() {
                        break;
                    }

                    match writer.clean_up(writer.watermark(), false) {
                        Ok(report) if !report.finalized.is_empty() => {
                            debug!(
                                "background cleanup finalized {} chunk(s): {}",
                                report.finalized.len(),
                                join_ids(&report.finalized)
                            );
                        }
                        Ok(_) => {}
                        Err(e) if e.is_fatal() => {
                            error!("background cleanup stopped: {}", e);
                            fatal.store(true, Ordering::Release);
                            *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
                            break;
                        }
                        Err(e) => warn!("background cleanup failed: {}", e),
                    }
                }
            })
            .map_err(|e| ChunkError::io("spawn cleanup thread for", run_dir, e))?;

        Ok(Self {
            shutdown_tx,
            handle: Some(handle),
            fatal_error,
            last_error,
        })
    }

    /// Ask the loop to stop after its current pass
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Whether the loop stopped because of a fatal error
    pub fn is_fatal_shutdown(&self) -> bool {
        self.fatal_error.load(Ordering::Acquire)
    }

    /// Stop the loop, wait for it, and return the fatal error that stopped it, if any
    pub fn shutdown(mut self) -> Result<()> {
        self.stop_and_join();
        match self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn stop_and_join(&mut self) {
        self.trigger_shutdown();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("background cleanup thread panicked");
        }
    }
}

impl Drop for CleanupRuntime {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn join_ids(ids: &[ChunkId]) -> String {
    ids.iter().map(ChunkId::to_string).collect::<Vec<_>>().join(", ")
}
