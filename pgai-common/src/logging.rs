//! Logging bootstrap shared by all three binaries, following
//! `syncserver::logging::init_logging`: `slog-term` for human-readable dev
//! output, `slog-mozlog-json` for structured production output, both wrapped
//! in `slog-envlogger` (so `RUST_LOG` still filters) and `slog-async` (so the
//! hot path never blocks on the sink).
use std::io;

use slog::{slog_o, Drain};
use slog_mozlog_json::MozLogJson;

/// Initializes the global `slog` logger and bridges the `log` crate onto it
/// so dependencies that log via `log::*` still end up in the same sink.
pub fn init_logging(service_name: &str, human_logs: bool) {
    let logger = if human_logs {
        let decorator = slog_term::TermDecorator::new().build();
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let drain = slog_envlogger::new(drain);
        let drain = slog_async::Async::new(drain).build().fuse();
        slog::Logger::root(drain, slog_o!("service" => service_name.to_string()))
    } else {
        let hostname = hostname_or_unknown();
        let drain = MozLogJson::new(io::stdout())
            .logger_name(format!("{}-{}", service_name, env!("CARGO_PKG_VERSION")))
            .msg_type(format!("{}:log", service_name))
            .hostname(hostname)
            .build()
            .fuse();
        let drain = slog_envlogger::new(drain);
        let drain = slog_async::Async::new(drain).build().fuse();
        slog::Logger::root(drain, slog_o!("service" => service_name.to_string()))
    };

    // slog_scope panics if the global logger is set twice (e.g. across
    // repeated test-harness init); cancel the reset guard the same way the
    // teacher does since we never want to tear it down mid-process.
    slog_scope::set_global_logger(logger).cancel_reset();
    let _ = slog_stdlog::init();
}

fn hostname_or_unknown() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string())
}

/// Resets the global logger to a discard drain; used by test harnesses that
/// initialize logging once per process and don't want repeated setup.
pub fn reset_logging() {
    let logger = slog::Logger::root(slog::Discard, slog_o!());
    slog_scope::set_global_logger(logger).cancel_reset();
}
