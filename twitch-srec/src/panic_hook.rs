use std::backtrace::Backtrace;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic::{PanicHookInfo, take_hook};
use std::path::{Path, PathBuf};
use std::thread;

use chrono::Local;

/// Install a panic hook that reports panics through `tracing`.
///
/// With `panic = "abort"` (release builds) the non-blocking file writer may
/// never flush, so the record is also appended directly to today's
/// `twitch-srec.log.YYYY-MM-DD` in `log_dir`.
pub fn install(log_dir: impl AsRef<Path>) {
    let log_dir = log_dir.as_ref().to_path_buf();
    let previous = take_hook();

    std::panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let record = describe(info);
            tracing::error!(target: "twitch_srec::panic", "{record}");
            if cfg!(panic = "abort") {
                let _ = append_to_daily_log(&log_dir, &record);
            }
        }));
        previous(info);
    }));
}

fn append_to_daily_log(log_dir: &Path, record: &str) -> std::io::Result<()> {
    let path: PathBuf = log_dir.join(format!(
        "twitch-srec.log.{}",
        Local::now().format("%Y-%m-%d")
    ));
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{record}")?;
    file.flush()
}

fn describe(info: &PanicHookInfo<'_>) -> String {
    let payload = info
        .payload()
        .downcast_ref::<&'static str>()
        .map(|s| (*s).to_string())
        .or_else(|| info.payload().downcast_ref::<String>().cloned())
        .unwrap_or_else(|| info.to_string());
    let location = info
        .location()
        .map_or_else(|| "<unknown>".to_string(), |l| format!("{}:{}", l.file(), l.line()));
    let thread = thread::current()
        .name()
        .unwrap_or("<unnamed>")
        .to_string();

    format!(
        "{} PANIC thread={thread} location={location} payload={payload}\nBacktrace:\n{}",
        Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
        Backtrace::force_capture()
    )
}
