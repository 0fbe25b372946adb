//! Board initialization bridge
//!
//! The board framework reports initialization through a single callback
//! carrying a status code. This turns that callback into a one-shot future.

use crate::domain::models::MBL_MW_STATUS_OK;
use crate::infrastructure::bluetooth::error::TransportError;
use std::ffi::c_void;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Create a linked completer / future pair
pub fn board_init_channel() -> (BoardInitCompleter, BoardInitFuture) {
    let (tx, rx) = oneshot::channel();
    (BoardInitCompleter { tx }, BoardInitFuture { rx })
}

/// Sending half; consumed by the first completion
pub struct BoardInitCompleter {
    tx: oneshot::Sender<i32>,
}

impl BoardInitCompleter {
    pub fn complete(self, status: i32) {
        if status == MBL_MW_STATUS_OK {
            info!("Board initialization successful");
        } else {
            warn!("Board initialization failed: {}", status);
        }
        if self.tx.send(status).is_err() {
            debug!("Board initialization result dropped, nobody is waiting");
        }
    }

    /// Leak into a context pointer for [`on_board_initialized`]
    pub fn into_raw(self) -> *mut c_void {
        Box::into_raw(Box::new(self)).cast()
    }

    /// # Safety
    ///
    /// `ptr` must come from [`Self::into_raw`] and not have been reclaimed yet.
    pub unsafe fn from_raw(ptr: *mut c_void) -> Self {
        *Box::from_raw(ptr.cast::<Self>())
    }
}

/// C callback for the framework's initialize call.
///
/// # Safety
///
/// `context` must be null or a pointer from [`BoardInitCompleter::into_raw`];
/// the framework invokes this at most once per context.
pub unsafe extern "C" fn on_board_initialized(
    context: *mut c_void,
    _board: *mut c_void,
    status: i32,
) {
    if context.is_null() {
        warn!("Board initialized without a completion context");
        return;
    }
    // SAFETY: guaranteed by the caller contract above
    let completer = unsafe { BoardInitCompleter::from_raw(context) };
    completer.complete(status);
}

/// Receiving half
pub struct BoardInitFuture {
    rx: oneshot::Receiver<i32>,
}

impl BoardInitFuture {
    /// Block the current thread until initialization finishes or `timeout`
    /// elapses. Must not be called from inside an async runtime.
    pub fn wait_timeout(self, timeout: Duration) -> Result<(), TransportError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        runtime
            .block_on(async { tokio::time::timeout(timeout, self).await })
            .map_err(|_| TransportError::BoardInitTimeout)?
    }
}

impl Future for BoardInitFuture {
    type Output = Result<(), TransportError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| match received {
            Ok(MBL_MW_STATUS_OK) => Ok(()),
            Ok(status) => Err(TransportError::BoardInit(status)),
            Err(_) => Err(TransportError::BoardInitAbandoned),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[tokio::test]
    async fn test_success_status() {
        let (completer, future) = board_init_channel();
        completer.complete(MBL_MW_STATUS_OK);
        assert!(future.await.is_ok());
    }

    #[tokio::test]
    async fn test_failure_status() {
        let (completer, future) = board_init_channel();
        completer.complete(16);
        assert!(matches!(future.await, Err(TransportError::BoardInit(16))));
    }

    #[tokio::test]
    async fn test_dropped_completer() {
        let (completer, future) = board_init_channel();
        drop(completer);
        assert!(matches!(
            future.await,
            Err(TransportError::BoardInitAbandoned)
        ));
    }

    #[tokio::test]
    async fn test_c_callback_roundtrip() {
        let (completer, future) = board_init_channel();
        let context = completer.into_raw() as usize;

        let handle = thread::spawn(move || {
            unsafe {
                on_board_initialized(
                    context as *mut c_void,
                    std::ptr::null_mut(),
                    MBL_MW_STATUS_OK,
                )
            };
        });

        assert!(future.await.is_ok());
        handle.join().unwrap();
    }

    #[test]
    fn test_null_context_is_ignored() {
        unsafe { on_board_initialized(std::ptr::null_mut(), std::ptr::null_mut(), 0) };
    }

    #[test]
    fn test_wait_timeout() {
        let (completer, future) = board_init_channel();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.complete(MBL_MW_STATUS_OK);
        });
        assert!(future.wait_timeout(Duration::from_secs(2)).is_ok());
        handle.join().unwrap();

        let (_completer, future) = board_init_channel();
        assert!(matches!(
            future.wait_timeout(Duration::from_millis(20)),
            Err(TransportError::BoardInitTimeout)
        ));
    }
}
