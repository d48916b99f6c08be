//! Asynchronous reception pipe
//!
//! One pipe per channel drains the bulk IN endpoint on a dedicated
//! thread using two alternating buffers: while the completion handler
//! runs over one buffer the other is already armed for the next
//! transfer, so back-to-back USB traffic is not lost to processing
//! time. The handler runs on the pipe thread and must not block.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::error::{CanError, Result};
use crate::usb::DeviceIo;

/// Size of each of the two transfer buffers
const BUFFER_SIZE: usize = 1024;

/// Poll timeout of one bulk read, also the abort latency bound
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Completion handler invoked with the filled buffer of each transfer
pub type PipeHandler = Box<dyn FnMut(&[u8]) + Send>;

/// Double-buffered bulk IN reader for one channel
pub struct AsyncPipe {
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl AsyncPipe {
    /// Arm the pipe and start draining the endpoint
    pub fn start(io: DeviceIo, handler: PipeHandler) -> Result<Self> {
        Self::spawn(move |buffer| io.bulk_read(buffer, READ_TIMEOUT), handler)
    }

    fn spawn(
        mut read: impl FnMut(&mut [u8]) -> Result<usize> + Send + 'static,
        mut handler: PipeHandler,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let thread = thread::Builder::new()
            .name("can-pipe".into())
            .spawn(move || {
                let mut buffers = [[0u8; BUFFER_SIZE], [0u8; BUFFER_SIZE]];
                let mut index = 0;
                while flag.load(Ordering::Acquire) {
                    match read(&mut buffers[index]) {
                        Ok(n) if n > 0 => {
                            // flip to the other buffer before processing,
                            // the completed one stays stable for the handler
                            let done = index;
                            index ^= 1;
                            handler(&buffers[done][..n]);
                        }
                        Ok(_) => {}
                        Err(CanError::Timeout) => {}
                        Err(CanError::ResourceError(rusb::Error::NoDevice)) => {
                            warn!("device gone, reception pipe stopped");
                            break;
                        }
                        Err(err) => {
                            warn!("bulk read failed: {}", err);
                            break;
                        }
                    }
                }
                // a failed re-arm stops the pipe just like an abort
                flag.store(false, Ordering::Release);
                debug!("reception pipe drained");
            })
            .map_err(|_| CanError::Fatal)?;
        Ok(AsyncPipe {
            running,
            thread: Some(thread),
        })
    }

    /// True while the reader thread is armed
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the pipe and wait for the in-flight transfer to finish
    ///
    /// Aborting an already stopped pipe is a no-op.
    pub fn abort(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AsyncPipe {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::time::Instant;

    #[test]
    fn test_completed_transfers_reach_the_handler_in_order() {
        let (tx, rx) = unbounded::<Vec<u8>>();
        let mut served = 0u8;
        let mut pipe = AsyncPipe::spawn(
            move |buffer| {
                if served < 4 {
                    buffer[0] = served;
                    served += 1;
                    Ok(1)
                } else {
                    Err(CanError::Timeout)
                }
            },
            Box::new(move |data| {
                let _ = tx.send(data.to_vec());
            }),
        )
        .unwrap();
        for expect in 0..4u8 {
            let data = rx.recv_timeout(Duration::from_secs(1)).unwrap();
            assert_eq!(data, vec![expect]);
        }
        pipe.abort();
    }

    #[test]
    fn test_read_error_clears_running() {
        let mut pipe =
            AsyncPipe::spawn(|_buffer| Err(CanError::Fatal), Box::new(|_| {})).unwrap();
        let deadline = Instant::now() + Duration::from_secs(1);
        while pipe.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!pipe.is_running());
        pipe.abort();
    }

    #[test]
    fn test_abort_is_idempotent() {
        let mut pipe =
            AsyncPipe::spawn(|_buffer| Err(CanError::Timeout), Box::new(|_| {})).unwrap();
        assert!(pipe.is_running());
        pipe.abort();
        assert!(!pipe.is_running());
        pipe.abort();
        assert!(!pipe.is_running());
    }
}
