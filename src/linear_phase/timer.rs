use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::info;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Dedicated thread calling `tick` every `interval` until dropped.
pub struct BackgroundTimer {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTimer {
    pub fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let thread_name = name.to_owned();

        let handle = thread::Builder::new().name(name.to_owned()).spawn(move || {
            info!("{thread_name}: timer started ({interval:?})");
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => tick(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            info!("{thread_name}: timer stopped");
        })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }
}

impl Drop for BackgroundTimer {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
