// Logging utilities for CLI
use std::io::Write;

/// Initialize logger for CLI
pub fn init_logger(verbose: bool, quiet: bool) {
    let default_level = if quiet {
        log::LevelFilter::Error
    } else if verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };

    // RUST_LOG overrides the flags entirely
    if std::env::var("RUST_LOG").is_ok() {
        return env_logger::init();
    }

    let mut builder = env_logger::Builder::new();

    builder.filter_level(default_level).format(|buf, record| match record.level() {
        log::Level::Error | log::Level::Warn => {
            writeln!(buf, "[{}] {}", record.level(), record.args())
        }
        log::Level::Info => writeln!(buf, "{}", record.args()),
        // producers and the cleanup thread interleave at debug level
        _ => {
            let thread = std::thread::current();
            writeln!(
                buf,
                "[{}:{}] {}",
                record.level(),
                thread.name().unwrap_or("worker"),
                record.args()
            )
        }
    });

    // Chunk open/finalize transitions are logged at debug level
    if verbose {
        builder.filter_module("strax_writer", log::LevelFilter::Debug);
    }

    builder.init();
}
