use log::{Level, LevelFilter, Metadata, Record};
use std::sync::OnceLock;
use std::time::SystemTime;

static BOOT_TIME: OnceLock<SystemTime> = OnceLock::new();

#[allow(dead_code)]
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BRIGHT_RED: &str = "\x1b[91m";
    pub const BRIGHT_YELLOW: &str = "\x1b[93m";
    pub const BRIGHT_GREEN: &str = "\x1b[92m";
    pub const BRIGHT_BLUE: &str = "\x1b[94m";
    pub const GRAY: &str = "\x1b[90m";
}

/// Logger that prints colored, timestamped lines to the console
struct UpdaterLogger;

impl log::Log for UpdaterLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let boot_time = BOOT_TIME.get_or_init(SystemTime::now);
        let elapsed = SystemTime::now()
            .duration_since(*boot_time)
            .unwrap_or_default();

        let color = match record.level() {
            Level::Error => colors::BRIGHT_RED,
            Level::Warn => colors::BRIGHT_YELLOW,
            Level::Info => colors::BRIGHT_GREEN,
            Level::Debug => colors::BRIGHT_BLUE,
            Level::Trace => colors::GRAY,
        };

        let line = format_line(
            elapsed.as_secs(),
            elapsed.subsec_millis(),
            record.level(),
            record.module_path().unwrap_or("unknown"),
            &record.args().to_string(),
        );
        println!("{}{}{}", color, line, colors::RESET);
    }

    fn flush(&self) {}
}

static LOGGER: UpdaterLogger = UpdaterLogger;

/// Compact time since boot: seconds, then minutes, then hours.
pub fn compact_timestamp(seconds: u64, millis: u32) -> String {
    if seconds < 60 {
        format!("{:>3}.{:03}s", seconds, millis)
    } else if seconds < 3600 {
        format!("{:>2}m{:02}s", seconds / 60, seconds % 60)
    } else {
        format!("{:>2}h{:02}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

/// One uncolored log line: `  1.234s [I]     protocol | message`
pub fn format_line(seconds: u64, millis: u32, level: Level, module_path: &str, message: &str) -> String {
    let level_char = match level {
        Level::Error => 'E',
        Level::Warn => 'W',
        Level::Info => 'I',
        Level::Debug => 'D',
        Level::Trace => 'T',
    };
    let module = module_path.rsplit("::").next().unwrap_or("unknown");
    let module_display: String = module.chars().take(12).collect();

    format!(
        "{} [{}] {:>12} | {}",
        compact_timestamp(seconds, millis),
        level_char,
        module_display,
        message
    )
}

/// Install the console logger at debug level
pub fn init_logger() -> Result<(), log::SetLoggerError> {
    let _ = BOOT_TIME.set(SystemTime::now());
    log::set_logger(&LOGGER)?;
    log::set_max_level(LevelFilter::Debug);

    println!("{}┌─────────────────────────────────────────┐{}", colors::BRIGHT_GREEN, colors::RESET);
    println!("{}│          ESP32 HTTP Updater             │{}", colors::BRIGHT_GREEN, colors::RESET);
    println!("{}└─────────────────────────────────────────┘{}", colors::BRIGHT_GREEN, colors::RESET);
    Ok(())
}

/// Parse and set log level from a string; returns true if applied
pub fn set_max_level_from_str(level: &str) -> bool {
    match parse_level(level) {
        Some(filter) => {
            log::set_max_level(filter);
            true
        }
        None => false,
    }
}

pub fn parse_level(level: &str) -> Option<LevelFilter> {
    let filter = match level.to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" | "warning" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => return None,
    };
    Some(filter)
}

/// Current global max level
pub fn current_max_level() -> LevelFilter {
    log::max_level()
}
