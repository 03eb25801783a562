//! Textual stack snapshots for crash reports and the SIGQUIT dump.
//!
//! A thread can only walk its own stack, so long-lived workers register themselves with
//! [`track`] and record a backtrace at every suspension point via [`TrackedTask::checkpoint`].
//! [`capture_stack_trace`] renders the caller's live stack followed by the last recorded stack of
//! every registered worker:
//!
//! ```text
//! thread 4 "main" [running]:
//! dispatcher::stacktrace::capture_stack_trace
//!         /src/dispatcher/src/stacktrace.rs:120
//! ...
//!
//! task 2 "accept loop" [waiting: accept]:
//! dispatcher::lifecycle::accept_loop::{{closure}}
//!         /src/dispatcher/src/lifecycle.rs:260
//! ...
//! ```
use backtrace::Backtrace;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

static REGISTRY: Lazy<Mutex<BTreeMap<u64, Entry>>> = Lazy::new(|| Mutex::new(BTreeMap::new()));

thread_local! {
    static THREAD_ID: u64 = NEXT_ID.fetch_add(1, Ordering::Relaxed);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Running,
    Waiting(&'static str),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Running => write!(f, "[running]"),
            Status::Waiting(reason) => write!(f, "[waiting: {reason}]"),
        }
    }
}

#[derive(Clone)]
struct Entry {
    label: String,
    status: Status,
    backtrace: Backtrace,
}

/// Registration of a long-lived worker in the stack registry.
///
/// The entry is removed when this is dropped.
pub struct TrackedTask {
    id: u64,
}

/// Register the current worker under `label`.
pub fn track(label: impl Into<String>) -> TrackedTask {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let entry = Entry {
        label: label.into(),
        status: Status::Running,
        backtrace: Backtrace::new_unresolved(),
    };
    registry().insert(id, entry);
    TrackedTask { id }
}

impl TrackedTask {
    /// Record that the worker is about to suspend on `reason`.
    #[inline(never)]
    pub fn checkpoint(&self, reason: &'static str) {
        self.record(Status::Waiting(reason));
    }

    /// Record that the worker is actively doing work.
    #[inline(never)]
    pub fn running(&self) {
        self.record(Status::Running);
    }

    #[inline(never)]
    fn record(&self, status: Status) {
        // Unwinding is cheap, symbol resolution is deferred until someone asks for a snapshot.
        let backtrace = Backtrace::new_unresolved();
        if let Some(entry) = registry().get_mut(&self.id) {
            entry.status = status;
            entry.backtrace = backtrace;
        }
    }
}

impl Drop for TrackedTask {
    fn drop(&mut self) {
        registry().remove(&self.id);
    }
}

fn registry() -> MutexGuard<'static, BTreeMap<u64, Entry>> {
    // Entries are plain data, a panic while holding the lock cannot leave them half written.
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Capture the stacks of the calling thread and of every registered worker.
///
/// One section per thread of execution: a header line with its id, label and status followed by
/// its frames, innermost first.
#[inline(never)]
pub fn capture_stack_trace() -> String {
    let caller = Backtrace::new();
    let thread = std::thread::current();

    let mut sections = vec![Section {
        marker: "thread",
        id: THREAD_ID.with(|id| *id),
        label: thread.name().unwrap_or("unnamed").to_owned(),
        status: Status::Running,
        backtrace: caller,
    }];

    // Clone under the lock, resolve outside of it.
    let tracked: Vec<(u64, Entry)> = registry()
        .iter()
        .map(|(id, entry)| (*id, entry.clone()))
        .collect();

    for (id, entry) in tracked {
        let mut backtrace = entry.backtrace;
        backtrace.resolve();
        sections.push(Section {
            marker: "task",
            id,
            label: entry.label,
            status: entry.status,
            backtrace,
        });
    }

    sections
        .iter()
        .map(|section| section.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

struct Section {
    marker: &'static str,
    id: u64,
    label: String,
    status: Status,
    backtrace: Backtrace,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} {} {:?} {}:",
            self.marker, self.id, self.label, self.status
        )?;

        let frames = self.backtrace.frames();
        let skip = frames
            .iter()
            .take_while(|frame| {
                let symbols = frame.symbols();
                !symbols.is_empty()
                    && symbols.iter().all(|symbol| match symbol.name() {
                        Some(name) => is_capture_machinery(&format!("{name:#}")),
                        None => false,
                    })
            })
            .count();
        // Keep everything if trimming would leave nothing, e.g. in a stripped binary.
        let frames = if skip < frames.len() {
            &frames[skip..]
        } else {
            frames
        };

        for frame in frames {
            let symbols = frame.symbols();
            if symbols.is_empty() {
                writeln!(f, "{:?}", frame.ip())?;
                continue;
            }
            for symbol in symbols {
                match symbol.name() {
                    Some(name) => writeln!(f, "{name:#}")?,
                    None => writeln!(f, "<unknown>")?,
                }
                if let (Some(file), Some(line)) = (symbol.filename(), symbol.lineno()) {
                    writeln!(f, "\t{}:{line}", file.display())?;
                }
            }
        }
        Ok(())
    }
}

fn is_capture_machinery(name: &str) -> bool {
    name.starts_with("backtrace::")
        || name.starts_with("<backtrace::")
        || name.contains("stacktrace::TrackedTask")
}
