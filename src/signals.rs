//! Process signal handling.
//!
//! Signals only flip flags in [`CaptureState`]: SIGTERM and SIGINT request
//! shutdown (the sampler then exits and the buffer is dumped), SIGTSTP pauses
//! sampling and SIGCONT resumes it.

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::signal::unix::{signal, SignalKind};

use crate::capture_state::CaptureState;

/// Install the handlers and serve them on a dedicated thread.
///
/// Handlers are registered before this returns, so a signal delivered right
/// after startup is not lost. The thread ends after a shutdown signal.
pub fn spawn_watcher(shared: Arc<CaptureState>) -> io::Result<JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let (mut terminate, mut interrupt, mut suspend, mut cont) = {
        let _guard = runtime.enter();
        (
            signal(SignalKind::terminate())?,
            signal(SignalKind::interrupt())?,
            signal(SignalKind::from_raw(libc::SIGTSTP))?,
            signal(SignalKind::from_raw(libc::SIGCONT))?,
        )
    };

    std::thread::Builder::new()
        .name("pulsein-signals".to_string())
        .spawn(move || {
            runtime.block_on(async {
                loop {
                    tokio::select! {
                        _ = terminate.recv() => {
                            log::info!("Received SIGTERM, shutting down");
                            break;
                        }
                        _ = interrupt.recv() => {
                            log::info!("Received SIGINT, shutting down");
                            break;
                        }
                        _ = suspend.recv() => {
                            log::info!("Received SIGTSTP, pausing");
                            shared.pause();
                        }
                        _ = cont.recv() => {
                            log::info!("Received SIGCONT, resuming");
                            shared.resume();
                        }
                    }
                }
                shared.request_shutdown();
            });
        })
}
