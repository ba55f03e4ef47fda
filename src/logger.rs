use slog::Drain;
use slog_term::{CompactFormat, TermDecorator};
use std::io;
use std::sync::Mutex;

use slog::*;

use crate::helpers::datetime;

/// Terminal logger on stderr, stdout is reserved for progress output.
pub struct Logger {
    pub log_level: u8,
    logger: slog::Logger,
}

fn level_from_u8(log_level: u8) -> Level {
    match log_level {
        0 => Level::Critical,
        1 => Level::Error,
        2 => Level::Warning,
        3 => Level::Info,
        4 => Level::Debug,
        5 => Level::Trace,
        // Default to debug
        _ => Level::Debug,
    }
}

fn new_drain(level: Level) -> Fuse<Mutex<Fuse<LevelFilter<CompactFormat<TermDecorator>>>>> {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::CompactFormat::new(decorator)
        .use_custom_timestamp(|w: &mut dyn io::Write| write!(w, "{}", datetime::now_local()))
        .build()
        .filter_level(level)
        .fuse();
    Mutex::new(drain).fuse()
}

impl Logger {
    pub fn new(log_level: u8) -> Self {
        let logger = slog::Logger::root(
            new_drain(level_from_u8(log_level)),
            slog::o!("version" => env!("CARGO_PKG_VERSION")),
        );
        Logger { log_level, logger }
    }

    /// Routes the `log` facade into this logger for the rest of the process
    pub fn set_global(&self) -> eyre::Result<&Self> {
        // slog_stdlog uses the logger from slog_scope, so set a logger there
        let guard = slog_scope::set_global_logger(self.logger.clone());
        // https://github.com/slog-rs/slog/issues/249
        guard.cancel_reset();
        slog_stdlog::init_with_level(log_level_filter(self.log_level))?;
        Ok(self)
    }
}

fn log_level_filter(log_level: u8) -> log::Level {
    match level_from_u8(log_level) {
        Level::Critical | Level::Error => log::Level::Error,
        Level::Warning => log::Level::Warn,
        Level::Info => log::Level::Info,
        Level::Debug => log::Level::Debug,
        Level::Trace => log::Level::Trace,
    }
}
