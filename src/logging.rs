use std::path::Path;

pub const LOG_FILE_BASENAME: &str = "questify";
pub const LOG_FILE_SUFFIX: &str = "log";
pub const LOG_ROTATE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
pub const LOG_ROTATE_KEEP_FILES: usize = 10;

/// Log files sit next to tasks.txt and config.properties.
pub fn log_directory(app_dir: &Path) -> &Path {
    app_dir
}

/// Picks the logger spec: `QUESTIFY_LOG`, then `RUST_LOG`, then the build default.
pub fn log_spec(questify_log: Option<String>, rust_log: Option<String>) -> String {
    let default_spec = if cfg!(debug_assertions) {
        "warn,questify_lib=debug,questify=debug"
    } else {
        "warn,questify_lib=info,questify=info"
    };
    questify_log
        .filter(|value| !value.trim().is_empty())
        .or_else(|| rust_log.filter(|value| !value.trim().is_empty()))
        .unwrap_or_else(|| default_spec.to_string())
}

#[cfg(all(feature = "app", not(test)))]
pub fn init_logging(app_dir: &Path) -> Result<(), flexi_logger::FlexiLoggerError> {
    use flexi_logger::{detailed_format, Cleanup, Criterion, FileSpec, Logger, Naming, WriteMode};

    std::fs::create_dir_all(app_dir)?;

    let spec = log_spec(
        std::env::var("QUESTIFY_LOG").ok(),
        std::env::var("RUST_LOG").ok(),
    );

    // The terminal belongs to the REPL, so logs only go to files.
    Logger::try_with_str(spec)?
        .log_to_file(
            FileSpec::default()
                .directory(log_directory(app_dir))
                .basename(LOG_FILE_BASENAME)
                .suffix(LOG_FILE_SUFFIX),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .format_for_files(detailed_format)
        .rotate(
            Criterion::Size(LOG_ROTATE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(LOG_ROTATE_KEEP_FILES),
        )
        .start()?;

    install_panic_hook();

    log::info!(
        "logger initialized dir={} rotate_size_bytes={} keep_files={}",
        log_directory(app_dir).display(),
        LOG_ROTATE_SIZE_BYTES,
        LOG_ROTATE_KEEP_FILES
    );
    Ok(())
}

#[cfg(all(feature = "app", not(test)))]
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info: &std::panic::PanicHookInfo<'_>| {
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| info.payload().downcast_ref::<String>().map(|s| s.as_str()))
            .unwrap_or("<non-string panic payload>");
        let location = info
            .location()
            .map(|loc| format!("{loc}"))
            .unwrap_or_else(|| "<unknown>".to_string());
        let backtrace = std::backtrace::Backtrace::force_capture();

        log::error!("panic: payload={payload} location={location}\nbacktrace:\n{backtrace}");
        default_hook(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn questify_log_takes_precedence() {
        let spec = log_spec(Some("trace".into()), Some("error".into()));
        assert_eq!(spec, "trace");
    }

    #[test]
    fn blank_values_fall_through() {
        assert_eq!(log_spec(Some("  ".into()), Some("error".into())), "error");
        let spec = log_spec(None, Some(String::new()));
        assert!(spec.starts_with("warn,questify_lib="));
    }

    #[test]
    fn logs_share_the_app_directory() {
        let dir = Path::new("/home/someone/.questify");
        assert_eq!(log_directory(dir), dir);
    }
}
