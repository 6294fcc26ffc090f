use std::io::Write;

use log::LevelFilter;

/// Install the logger. Diagnostics stay hidden unless `verbose` is set;
/// errors are always printed.
pub fn init(verbose: bool) {
    // `try_init` only fails when a logger is already installed; the first one
    // stays and only the level below is adjusted.
    let _ = env_logger::Builder::new()
        .filter_level(LevelFilter::Debug)
        .parse_default_env()
        .format(|buf, record| writeln!(buf, "selfextract: {}", record.args()))
        .try_init();
    set_verbose(verbose);
}

/// Raise or lower the visible level after initialization.
pub fn set_verbose(verbose: bool) {
    log::set_max_level(if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Error
    });
}
