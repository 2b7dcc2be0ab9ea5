//! `ConsoleCollector`: background capture of a host's serial console (§4.4).
//!
//! Capture is optional — a bisection must not fail if it is unavailable.
//! Multiple backends are tried in declared order; the first that starts
//! successfully wins, and failure to start any of them is logged, not
//! propagated.

use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// In-memory buffer past which captured bytes spill to a temp file rather
/// than growing the process's resident set without bound.
const SPILL_THRESHOLD_BYTES: usize = 4 * 1024 * 1024;

/// Captured console output, which may have spilled to disk partway through.
enum CaptureSink {
    Memory(Vec<u8>),
    Spilled(std::fs::File),
}

impl CaptureSink {
    fn write(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        match self {
            CaptureSink::Memory(buf) => {
                if buf.len() + chunk.len() > SPILL_THRESHOLD_BYTES {
                    let mut file = tempfile::tempfile()?;
                    file.write_all(buf)?;
                    file.write_all(chunk)?;
                    *self = CaptureSink::Spilled(file);
                } else {
                    buf.extend_from_slice(chunk);
                }
                Ok(())
            }
            CaptureSink::Spilled(file) => file.write_all(chunk),
        }
    }

    fn into_vec(self) -> Vec<u8> {
        match self {
            CaptureSink::Memory(buf) => buf,
            CaptureSink::Spilled(mut file) => {
                let mut buf = Vec::new();
                if file.seek(SeekFrom::Start(0)).is_ok() {
                    let _ = file.read_to_end(&mut buf);
                }
                buf
            }
        }
    }
}

/// A running capture session. Dropping it without calling `stop` leaves the
/// background task running until the next `stop` — callers must always
/// call `stop` on every exit path, including cancellation.
pub struct ConsoleSession {
    handle: JoinHandle<Vec<u8>>,
    stop_tx: tokio::sync::oneshot::Sender<()>,
}

/// One pluggable console capture back end (serial-over-LAN, a console
/// concentrator, ...). Implementors return `None` from `try_start` if their
/// particular transport is unavailable for this host.
#[async_trait::async_trait]
pub trait ConsoleBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn try_start(&self, host_id: &str) -> Option<ConsoleSession>;
}

/// Tries a list of backends in order and owns whichever one started.
pub struct ConsoleCollector {
    backends: Vec<Arc<dyn ConsoleBackend>>,
    active: AsyncMutex<Option<(String, ConsoleSession)>>,
}

impl ConsoleCollector {
    pub fn new(backends: Vec<Arc<dyn ConsoleBackend>>) -> Self {
        Self {
            backends,
            active: AsyncMutex::new(None),
        }
    }

    /// Start capture for `host_id`, trying each backend in order. Logs and
    /// returns `false` (not an error) if every backend failed to start.
    pub async fn start(&self, host_id: &str) -> bool {
        for backend in &self.backends {
            if let Some(session) = backend.try_start(host_id).await {
                info!(host_id, backend = backend.name(), "console capture started");
                *self.active.lock().await = Some((backend.name().to_string(), session));
                return true;
            }
        }
        warn!(host_id, "no console backend available, capture omitted");
        false
    }

    /// Stop the active capture, if any, and return whatever bytes were
    /// collected.
    pub async fn stop(&self) -> Vec<u8> {
        let slot = self.active.lock().await.take();
        match slot {
            Some((name, session)) => {
                let _ = session.stop_tx.send(());
                match session.handle.await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(backend = name, %e, "console capture task panicked");
                        Vec::new()
                    }
                }
            }
            None => Vec::new(),
        }
    }
}

/// Spawns a background task that copies bytes from `source` into a buffer
/// until `stop` is signalled, spilling past [`SPILL_THRESHOLD_BYTES`].
pub fn spawn_capture<S>(mut source: S) -> ConsoleSession
where
    S: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    use tokio::io::AsyncReadExt;
    let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();

    let handle = tokio::spawn(async move {
        let mut sink = CaptureSink::Memory(Vec::new());
        let mut chunk = [0u8; 8192];
        let mut spilled = false;
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                n = source.read(&mut chunk) => {
                    match n {
                        Ok(0) => break,
                        Ok(n) => {
                            if !spilled && matches!(sink, CaptureSink::Memory(ref buf) if buf.len() + n > SPILL_THRESHOLD_BYTES) {
                                spilled = true;
                                warn!("console capture exceeded in-memory threshold, spilling to disk");
                            }
                            if sink.write(&chunk[..n]).is_err() {
                                warn!("console capture spill write failed");
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
            }
        }
        sink.into_vec()
    });

    ConsoleSession { handle, stop_tx }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverAvailable;
    #[async_trait::async_trait]
    impl ConsoleBackend for NeverAvailable {
        fn name(&self) -> &str {
            "never"
        }
        async fn try_start(&self, _host_id: &str) -> Option<ConsoleSession> {
            None
        }
    }

    #[tokio::test]
    async fn start_returns_false_when_no_backend_available() {
        let collector = ConsoleCollector::new(vec![Arc::new(NeverAvailable)]);
        assert!(!collector.start("h1").await);
        assert!(collector.stop().await.is_empty());
    }
}
