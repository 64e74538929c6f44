//! Stops a server on SIGINT, SIGQUIT or SIGTERM.
use std::io;
use std::thread;

use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;

use crate::server::ShutdownHandle;

/// Spawns a thread that triggers `handle` on the first termination signal.
///
/// # Errors
/// Returns an error if the signal handlers cannot be installed or the
/// thread cannot be spawned.
pub fn install(handle: ShutdownHandle) -> io::Result<thread::JoinHandle<()>> {
    let mut signals = Signals::new([SIGINT, SIGQUIT, SIGTERM])?;

    thread::Builder::new()
        .name("ptth-signals".to_owned())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                log::info!("Received signal {}, closing server", signal);
                handle.shutdown();
            }
        })
}
