use tracing::Level;

/// Install the global fmt subscriber.
///
/// Debug builds (or `verbose`) log at DEBUG, release builds at INFO. Thread
/// names are kept in every line so driver and worker output can be told apart.
pub fn init(verbose: bool) {
    let level = if verbose || cfg!(debug_assertions) {
        Level::DEBUG
    } else {
        Level::INFO
    };
    // Logs go to stderr; stdout carries the summary and CSV output.
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_thread_names(true)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
