use std::process;

use echoprobe::Identity;

/// Generate a random slot index so concurrent runs on one host get
/// distinct signatures.
pub fn generate_slot() -> u32 {
    use rand::Rng;
    rand::thread_rng().gen_range(1..=u32::MAX)
}

/// Identity of this process: host id is the pid, slot is random.
pub fn local_identity() -> Identity {
    Identity {
        host_id: process::id(),
        slot: generate_slot(),
    }
}

/// Print error message and exit with error code
pub fn exit_with_error(message: &str, code: i32) -> ! {
    eprintln!("echoprobe: {}", message);
    process::exit(code);
}

/// Handle Ctrl+C signal for graceful shutdown
pub fn setup_signal_handler() -> tokio::sync::oneshot::Receiver<()> {
    let (tx, rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = tx.send(());
            }
            Err(e) => log::warn!("failed to listen for Ctrl+C: {}", e),
        }
    });

    rx
}
