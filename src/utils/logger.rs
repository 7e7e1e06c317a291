use colored::Colorize;
use env_logger::Builder;
use log::Level;
use std::io::Write;

pub fn setup_logging(verbose: bool) {
    use log::LevelFilter;

    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    // try_init: library callers and tests may already have installed a logger.
    let _ = Builder::from_default_env()
        .filter_level(LevelFilter::Warn)
        .filter_module(env!("CARGO_PKG_NAME"), level)
        .format(|buf, record| {
            let name = env!("CARGO_PKG_NAME");
            let line = match record.level() {
                Level::Error | Level::Warn => {
                    let level_str = match record.level() {
                        Level::Warn => "WARN".yellow(),
                        _ => "ERROR".red(),
                    };
                    let thread = std::thread::current();
                    let origin = thread.name().unwrap_or_else(|| record.target()).white();
                    format!("[{} {} {}] {}", name.cyan(), level_str, origin, record.args())
                }
                _ => format!("[{}] {}", name.cyan(), record.args()),
            };
            writeln!(buf, "{}", line)
        })
        .try_init();
}

/// ANSI colors for the batch summary.
pub struct Colors;

impl Colors {
    pub const SUCCEEDED: &'static str = "green";
    pub const SKIPPED: &'static str = "cyan";
    pub const FAILED: &'static str = "red";
    pub const DROPPED: &'static str = "yellow";

    pub fn colorize(color: &str, text: &str) -> String {
        text.color(color).to_string()
    }
}
