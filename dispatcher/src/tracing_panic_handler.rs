use backtrace::{Backtrace, BacktraceFmt, BytesOrWideString, PrintFmt};
use std::fmt;

/// Report panics as `tracing` error events carrying a short backtrace.
pub fn setup() {
    std::panic::set_hook(Box::new(|panic| {
        let backtrace = BacktraceFormatter(Backtrace::new());
        if let Some(location) = panic.location() {
            tracing::error!(
                message = %panic,
                panic.file = location.file(),
                panic.line = location.line(),
                panic.column = location.column(),
                panic.backtrace = %backtrace,
            );
        } else {
            tracing::error!(message = %panic, panic.backtrace = %backtrace);
        }
    }));
}

struct BacktraceFormatter(Backtrace);

impl fmt::Display for BacktraceFormatter {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let style = if fmt.alternate() {
            PrintFmt::Full
        } else {
            PrintFmt::Short
        };

        // Paths under the working directory are printed relative to it.
        let cwd = std::env::current_dir();
        let mut print_path = move |fmt: &mut fmt::Formatter<'_>, path: BytesOrWideString<'_>| {
            let path = path.into_path_buf();
            if style != PrintFmt::Full {
                if let Ok(cwd) = &cwd {
                    if let Ok(suffix) = path.strip_prefix(cwd) {
                        return fmt::Display::fmt(&suffix.display(), fmt);
                    }
                }
            }
            fmt::Display::fmt(&path.display(), fmt)
        };

        let mut f = BacktraceFmt::new(fmt, style, &mut print_path);
        f.add_context()?;
        // Drop the frames of the panic machinery and of the runtime below our code.
        for (frame, _) in backtrace_ext::short_frames_strict(&self.0) {
            f.frame().backtrace_frame(frame)?;
        }
        f.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn short_backtrace_is_relative_to_cwd() {
        let formatted = BacktraceFormatter(Backtrace::new()).to_string();
        println!("BACKTRACE:\n{formatted}");

        assert!(formatted.contains("short_backtrace_is_relative_to_cwd"), "{formatted}");
        assert!(formatted.contains("src/tracing_panic_handler.rs"), "{formatted}");
        let cwd = std::env::current_dir().unwrap();
        assert!(!formatted.contains(&*cwd.to_string_lossy()), "{formatted}");
        // the test harness below the test function is cut off
        assert!(!formatted.contains("__rust_begin_short_backtrace"), "{formatted}");
    }

    #[test]
    fn full_backtrace_keeps_absolute_paths() {
        let formatted = format!("{:#}", BacktraceFormatter(Backtrace::new()));
        let cwd = std::env::current_dir().unwrap();
        assert!(formatted.contains(&*cwd.to_string_lossy()), "{formatted}");
    }

    #[test]
    fn panic_becomes_error_event() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_writer(move || writer.clone())
            .finish();

        setup();
        let result = tracing::subscriber::with_default(subscriber, || {
            std::panic::catch_unwind(|| panic!("connection table corrupted"))
        });
        // back to the default hook
        drop(std::panic::take_hook());
        assert!(result.is_err());

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let event: serde_json::Value = serde_json::from_str(output.lines().next().unwrap()).unwrap();
        assert_eq!(event["level"], "ERROR");
        let fields = &event["fields"];
        assert!(fields["message"]
            .as_str()
            .unwrap()
            .contains("connection table corrupted"));
        assert!(fields["panic.file"]
            .as_str()
            .unwrap()
            .ends_with("src/tracing_panic_handler.rs"));
        assert!(fields["panic.backtrace"]
            .as_str()
            .unwrap()
            .contains("panic_becomes_error_event"));
    }
}
