//! Structured logging for applications embedding the orchestrator.
//!
//! The library itself logs through the [`log`] facade. Applications may use
//! [`init`] to route these records into a JSON [`Logger`].
//!
//! [`log`]: ::log

use std::{env, io};

use chrono::Local;
use slog::{
    o, Drain, Duplicate, FilterLevel, FnValue, Fuse, Level, Logger,
    PushFnValue, Record,
};
use slog_async::Async;
use slog_json::Json;
use slog_scope::GlobalLoggerGuard;

use crate::conf;

/// Builds JSON [`Logger`] which prints all its log records to `w_out` writer,
/// but WARN level (and higher) to `w_err` writer. Logger will use [`Async`]
/// drain with channel size of 2048 entries.
///
/// Records above the provided `level` are discarded, unless `RUST_LOG`
/// environment variable overrides it.
///
/// Created [`Logger`] produces log records with `fqn`, `lvl`, `time` and `msg`
/// fields by default.
pub fn new_dual_logger<W1, W2>(
    w_out: W1,
    w_err: W2,
    level: FilterLevel,
) -> Logger
where
    W1: io::Write + Send + 'static,
    W2: io::Write + Send + 'static,
{
    let drain_out = Json::new(w_out).build();
    let drain_err = Json::new(w_err).build();
    let drain = Duplicate(
        drain_out.filter(|r| !r.level().is_at_least(Level::Warning)),
        drain_err.filter_level(Level::Warning),
    )
    .map(Fuse);
    let mut drain = slog_envlogger::LogBuilder::new(drain).filter(None, level);
    if let Ok(filters) = env::var("RUST_LOG") {
        drain = drain.parse(&filters);
    }
    let drain = drain.build().fuse();
    let drain = Async::new(drain).chan_size(2048).build().fuse();
    add_default_keys(&Logger::root(drain, o!()))
}

/// Initializes global [`Logger`] writing to stdout/stderr with the level
/// from the provided [`conf::Log`], and redirects the [`log`] facade records
/// into it.
///
/// Logging stays enabled as long as the returned [`GlobalLoggerGuard`] is
/// alive.
///
/// # Errors
///
/// If the [`log`] facade already has a logger set.
///
/// [`log`]: ::log
pub fn init(
    conf: &conf::Log,
) -> Result<GlobalLoggerGuard, ::log::SetLoggerError> {
    let level = conf
        .level()
        .and_then(|l| FilterLevel::from_usize(l.as_usize()))
        .unwrap_or(FilterLevel::Off);
    let logger = new_dual_logger(io::stdout(), io::stderr(), level);
    let guard = slog_scope::set_global_logger(logger);
    slog_stdlog::init()?;
    Ok(guard)
}

/// Adds default log record data (key-value pairs) to specified [`Logger`]:
/// - `msg`: log record message.
/// - `fqn`: path to code line that called log function.
/// - `time`: creation date and time of log record in [RFC 3339] format.
/// - `lvl`: logging level of log record.
///
/// [RFC 3339]: https://www.ietf.org/rfc/rfc3339.txt
fn add_default_keys(logger: &Logger) -> Logger {
    logger.new(o!(
        "msg" => PushFnValue(move |record : &Record, ser| {
            ser.emit(record.msg())
        }),
        "fqn" => PushFnValue(move |record : &Record, ser| {
             ser.emit(format_args!("{}:{}", record.module(), record.line()))
        }),
        "time" => PushFnValue(move |_ : &Record, ser| {
            ser.emit(Local::now().to_rfc3339())
        }),
        "lvl" => FnValue(move |rinfo : &Record| {
            rinfo.level().as_str()
        }),
    ))
}

#[cfg(test)]
mod spec {
    use std::{
        io,
        sync::{Arc, Mutex},
    };

    use slog::{info, warn, FilterLevel};

    use super::new_dual_logger;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn splits_warnings_to_err_writer() {
        let (out, err) = (Buffer::default(), Buffer::default());
        {
            let logger =
                new_dual_logger(out.clone(), err.clone(), FilterLevel::Trace);
            info!(logger, "joined"; "session_id" => "s1");
            warn!(logger, "reconnecting");
        }

        let out = String::from_utf8(out.0.lock().unwrap().clone()).unwrap();
        let err = String::from_utf8(err.0.lock().unwrap().clone()).unwrap();
        assert!(out.contains(r#""msg":"joined""#));
        assert!(out.contains(r#""session_id":"s1""#));
        assert!(out.contains(r#""lvl":"INFO""#));
        assert!(!out.contains("reconnecting"));
        assert!(err.contains(r#""lvl":"WARNING""#));
    }
}
