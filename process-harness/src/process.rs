use crate::event::{Event, Fields, Level};
use crate::event_matcher::{EventMatcher, Events};
use anyhow::{Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use nu_ansi_term::Color;
use std::net::SocketAddr;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// How a server process ended.
#[derive(Debug)]
pub struct Exit {
    /// Every event logged since the last `wait_for*` call returned.
    pub events: Events,
    pub code: i32,
}

/// A server that exited cleanly after SIGTERM.
#[derive(Debug)]
pub struct Shutdown {
    pub events: Events,
    /// Drain time reported by the server itself in its `shutdown complete` event.
    pub elapsed: Duration,
}

/// A server binary running in a child process.
///
/// The binary has to log `tracing` events as JSON to stdout. Each event is parsed, made available to
/// the `wait_for*` methods and echoed to the test output in human readable form, prefixed with the
/// log name. Output on stderr is reported as an error of the test.
///
/// A `ServerProcess` must be finished with [`ServerProcess::shutdown`] or
/// [`ServerProcess::wait_for_exit`], otherwise dropping it panics: those are the methods that check
/// the exit code and the remaining logs.
///
/// ```rust
/// # use process_harness::ServerProcess;
/// # use std::path::Path;
/// # async {
/// let mut dispatcher = ServerProcess::start(
///     Path::new("target/debug/dispatcher"),
///     "dispatcher",
///     &["--log-format", "json", "server", "--port=51000"],
/// )
/// .await;
/// let address = dispatcher.wait_until_listening().await;
/// assert_eq!(address.port(), 51000);
/// let shutdown = dispatcher.shutdown(&[]).await;
/// println!("drained in {:?}", shutdown.elapsed);
/// # };
/// ```
pub struct ServerProcess {
    name: String,
    /// Taken once the exit status is collected
    child: Option<Child>,
    events: mpsc::UnboundedReceiver<Event>,
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        if self.child.is_some() && !std::thread::panicking() {
            panic!(
                "{} was dropped while still running, finish it with `shutdown` or `wait_for_exit` so that its exit code and logs are checked",
                self.name.trim_end()
            );
        }
    }
}

impl ServerProcess {
    /// Spawn the binary at `bin_path` with `args`.
    ///
    /// `log_name` prefixes every forwarded event, telling them apart from the logs of the test itself.
    /// It is padded to 10 characters so that the output lines up.
    pub async fn start(bin_path: &Path, log_name: &str, args: &[&str]) -> ServerProcess {
        // stderr output is reported through the test's own subscriber
        tracing_subscriber::fmt().with_test_writer().try_init().ok();

        assert!(
            log_name.len() <= 10,
            "log_name {log_name:?} is longer than 10 characters and would not line up with the rest of the output"
        );
        let name = format!("{log_name:<10}");

        let mut child = Command::new(bin_path)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", bin_path.display()))
            .unwrap();

        let (tx, events) = mpsc::unbounded_channel();
        let stdout = BufReader::new(child.stdout.take().unwrap());
        let stderr = BufReader::new(child.stderr.take().unwrap());
        tokio::spawn(forward_events(stdout, tx, name.clone()));
        tokio::spawn(report_stderr(stderr, name.clone()));

        ServerProcess {
            name,
            child: Some(child),
            events,
        }
    }

    /// Deliver `signal` to the process.
    pub fn signal(&self, signal: Signal) {
        let pid = self
            .child
            .as_ref()
            .and_then(Child::id)
            .unwrap_or_else(|| panic!("{} has already exited", self.name.trim_end()));
        kill(Pid::from_raw(pid as i32), signal).unwrap();
    }

    /// Collect events until one matches `matcher`, and return all of them.
    ///
    /// Warnings and errors not accepted by `allowed` fail the test.
    pub async fn wait_for(&mut self, matcher: &EventMatcher, allowed: &[EventMatcher]) -> Events {
        let mut events = vec![];
        loop {
            let Some(event) = self.events.recv().await else {
                panic!(
                    "{} exited before logging an event matching {matcher:?}\nevents:\n{}",
                    self.name.trim_end(),
                    Events { events }
                );
            };
            let found = matcher.matches(&event);
            events.push(event);
            if found {
                break;
            }
        }

        let events = Events { events };
        events.assert_no_unexpected_errors_or_warnings(allowed);
        events
    }

    /// Wait for the server to accept connections and return the address it is listening on.
    pub async fn wait_until_listening(&mut self) -> SocketAddr {
        let listening = EventMatcher::new()
            .with_level(Level::Info)
            .with_message("accepting inbound connections");
        let events = self.wait_for(&listening, &[]).await;

        let address = events
            .find(&listening)
            .and_then(|event| event.field("address"))
            .unwrap_or_else(|| panic!("listening event without an address\nevents:\n{events}"));
        address
            .parse()
            .unwrap_or_else(|err| panic!("listening on unparseable address {address:?}: {err}"))
    }

    /// SIGTERM the server, wait for a successful exit and return what it reported.
    pub async fn shutdown(self, allowed: &[EventMatcher]) -> Shutdown {
        self.signal(Signal::SIGTERM);
        let Exit { events, code } = self.wait_for_exit(allowed).await;
        assert_eq!(code, 0, "exit code after SIGTERM\nevents:\n{events}");

        let elapsed = events
            .find(&EventMatcher::new().with_message("shutdown complete"))
            .and_then(|event| event.field("elapsed_ms"))
            .and_then(|elapsed_ms| elapsed_ms.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or_else(|| panic!("exited without completing a shutdown\nevents:\n{events}"));
        Shutdown { events, elapsed }
    }

    /// Wait for the process to exit on its own, e.g. after a signal sent with [`ServerProcess::signal`]
    /// or a startup failure. Returns the remaining events and the exit code.
    pub async fn wait_for_exit(mut self, allowed: &[EventMatcher]) -> Exit {
        // Taken up front so the drop bomb stays quiet if the caller wraps this in a timeout.
        let mut child = self.child.take().unwrap();

        let mut events = vec![];
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let events = Events { events };
        events.assert_no_unexpected_errors_or_warnings(allowed);

        let status = child.wait().await.unwrap();
        let code = status.code().unwrap_or_else(|| {
            panic!(
                "{} was killed by signal {:?} instead of exiting. It was either signalled before registering its handlers, or aborted.\nevents:\n{events}",
                self.name.trim_end(),
                status.signal()
            )
        });
        Exit { events, code }
    }
}

async fn forward_events(
    stdout: impl AsyncBufRead + Unpin,
    tx: mpsc::UnboundedSender<Event>,
    name: String,
) {
    if let Err(err) = parse_events(stdout, &tx, &name).await {
        // A panic in this task would go unnoticed, an error event fails the test.
        let event = Event {
            timestamp: String::new(),
            level: Level::Error,
            target: "process-harness".to_owned(),
            fields: Fields {
                message: format!("{err:#}"),
                fields: Default::default(),
            },
            span: Default::default(),
            spans: Default::default(),
        };
        tx.send(event).ok();
    }
}

async fn parse_events(
    stdout: impl AsyncBufRead + Unpin,
    tx: &mpsc::UnboundedSender<Event>,
    name: &str,
) -> Result<()> {
    let mut lines = stdout.lines();
    while let Some(line) = lines
        .next_line()
        .await
        .context("failed to read stdout of the server process")?
    {
        let event = Event::from_json_str(&line)
            .with_context(|| format!("server process wrote a line that is not a JSON event: {line}"))?;
        println!("{} {event}", Color::Default.dimmed().paint(name));
        if tx.send(event).is_err() {
            // nobody is waiting for events anymore
            break;
        }
    }
    Ok(())
}

async fn report_stderr(stderr: impl AsyncBufRead + Unpin, name: String) {
    let mut lines = stderr.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::error!("{} wrote to stderr: {line}", name.trim_end());
    }
}
