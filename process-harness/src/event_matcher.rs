use crate::event::{Event, Level};
use itertools::Itertools;
use std::fmt::{self, Display};

/// A list of events returned by the methods of [`crate::ServerProcess`].
#[derive(Debug, Clone)]
pub struct Events {
    pub events: Vec<Event>,
}

impl Events {
    pub fn contains(&self, matcher: &EventMatcher) -> bool {
        self.events.iter().any(|event| matcher.matches(event))
    }

    /// The first event matched by `matcher`.
    pub fn find(&self, matcher: &EventMatcher) -> Option<&Event> {
        self.events.iter().find(|event| matcher.matches(event))
    }

    /// Panics if none of the events match `matcher`.
    pub fn assert_contains(&self, matcher: &EventMatcher) -> &Self {
        if !self.contains(matcher) {
            panic!("An event with {matcher:?} was not found in the list of events:\n{self}")
        }
        self
    }

    /// Panics on an ERROR or WARN event that none of `allowed` match,
    /// or when one of `allowed` did not match the number of times its [`Count`] demands.
    pub fn assert_no_unexpected_errors_or_warnings(&self, allowed: &[EventMatcher]) {
        let mut matched_counts = vec![0; allowed.len()];
        for event in &self.events {
            if let Level::Error | Level::Warn = event.level {
                let mut matched = false;
                for (matcher, count) in allowed.iter().zip(matched_counts.iter_mut()) {
                    if matcher.matches(event) {
                        *count += 1;
                        matched = true;
                    }
                }
                if !matched {
                    panic!("Unexpected event {event}\nAny ERROR or WARN events that occur in integration tests must be explicitly allowed by adding an appropriate EventMatcher to the method call.")
                }
            }
        }

        for (matcher, count) in allowed.iter().zip(matched_counts) {
            if !matcher.count.accepts(count) {
                panic!(
                    "Expected to find matches for {matcher:?}, {} but actually matched {count} times",
                    matcher.count
                )
            }
        }
    }

    /// Panics if any of the events match `matcher`.
    pub fn assert_not_contains(&self, matcher: &EventMatcher) -> &Self {
        if let Some(event) = self.find(matcher) {
            panic!("An event with {matcher:?} was unexpectedly found:\n{event}")
        }
        self
    }
}

impl Display for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.events.iter().join("\n"))
    }
}

/// How many times an allowed warning or error must occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Count {
    Any,
    Times(usize),
    GreaterThanOrEqual(usize),
    LessThanOrEqual(usize),
}

impl Count {
    fn accepts(self, actual: usize) -> bool {
        match self {
            Count::Any => true,
            Count::Times(expected) => actual == expected,
            Count::GreaterThanOrEqual(min) => actual >= min,
            Count::LessThanOrEqual(max) => actual <= max,
        }
    }
}

impl Display for Count {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Count::Any => write!(f, "any number of times"),
            Count::Times(expected) => write!(f, "{expected} times"),
            Count::GreaterThanOrEqual(min) => write!(f, "greater than or equal to {min} times"),
            Count::LessThanOrEqual(max) => write!(f, "less than or equal to {max} times"),
        }
    }
}

/// Matches an [`Event`] on every property that was set, unset properties match anything.
#[derive(Debug, Clone)]
pub struct EventMatcher {
    level: Option<Level>,
    target: Option<String>,
    message: Option<String>,
    message_contains: Option<String>,
    fields_contain: Vec<(String, String)>,
    pub(crate) count: Count,
}

impl Default for EventMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventMatcher {
    pub fn new() -> EventMatcher {
        EventMatcher {
            level: None,
            target: None,
            message: None,
            message_contains: None,
            fields_contain: vec![],
            count: Count::Times(1),
        }
    }

    pub fn with_level(mut self, level: Level) -> EventMatcher {
        self.level = Some(level);
        self
    }

    pub fn with_target(mut self, target: &str) -> EventMatcher {
        self.target = Some(target.to_owned());
        self
    }

    pub fn with_message(mut self, message: &str) -> EventMatcher {
        self.message = Some(message.to_owned());
        self
    }

    pub fn with_message_containing(mut self, substring: &str) -> EventMatcher {
        self.message_contains = Some(substring.to_owned());
        self
    }

    /// Requires the field `name` to be present and its value to contain `substring`.
    pub fn with_field_containing(mut self, name: &str, substring: &str) -> EventMatcher {
        self.fields_contain
            .push((name.to_owned(), substring.to_owned()));
        self
    }

    /// Only used when the matcher is passed as an allowed warning or error.
    /// Defaults to `Count::Times(1)`.
    pub fn with_count(mut self, count: Count) -> EventMatcher {
        self.count = count;
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.level.map_or(true, |level| level == event.level)
            && self
                .target
                .as_ref()
                .map_or(true, |target| target == &event.target)
            && self
                .message
                .as_ref()
                .map_or(true, |message| message == &event.fields.message)
            && self
                .message_contains
                .as_ref()
                .map_or(true, |substring| event.fields.message.contains(substring.as_str()))
            && self.fields_contain.iter().all(|(name, substring)| {
                event
                    .field(name)
                    .map_or(false, |value| value.contains(substring.as_str()))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Fields;

    fn event(level: Level, target: &str, message: &str) -> Event {
        Event {
            timestamp: "".to_owned(),
            level,
            target: target.to_owned(),
            fields: Fields {
                message: message.to_owned(),
                fields: Default::default(),
            },
            span: Default::default(),
            spans: Default::default(),
        }
    }

    #[test]
    fn empty_matcher_matches_everything() {
        assert!(EventMatcher::new().matches(&event(Level::Trace, "a", "b")));
    }

    #[test]
    fn every_property_must_match() {
        let matcher = EventMatcher::new()
            .with_level(Level::Info)
            .with_target("dispatcher::lifecycle")
            .with_message("shutdown complete");

        assert!(matcher.matches(&event(
            Level::Info,
            "dispatcher::lifecycle",
            "shutdown complete"
        )));
        assert!(!matcher.matches(&event(
            Level::Warn,
            "dispatcher::lifecycle",
            "shutdown complete"
        )));
        assert!(!matcher.matches(&event(Level::Info, "dispatcher", "shutdown complete")));
        assert!(!matcher.matches(&event(
            Level::Info,
            "dispatcher::lifecycle",
            "shutting down"
        )));
    }

    #[test]
    fn substring_matches() {
        let mut with_field = event(Level::Info, "dispatcher::signals", "stack snapshot");
        with_field.fields.fields.insert(
            "stack".to_owned(),
            serde_json::Value::String("thread 1 \"main\" [running]:".to_owned()),
        );

        assert!(EventMatcher::new()
            .with_message_containing("snapshot")
            .with_field_containing("stack", "[running]")
            .matches(&with_field));
        assert!(!EventMatcher::new()
            .with_field_containing("stack", "[waiting")
            .matches(&with_field));
        assert!(!EventMatcher::new()
            .with_field_containing("stack", "[running]")
            .matches(&event(Level::Info, "dispatcher::signals", "stack snapshot")));
    }

    #[test]
    fn events_assertions() {
        let events = Events {
            events: vec![
                event(Level::Info, "dispatcher", "Initializing!"),
                event(Level::Info, "dispatcher::lifecycle", "shutdown complete"),
            ],
        };
        events
            .assert_contains(&EventMatcher::new().with_message("Initializing!"))
            .assert_not_contains(&EventMatcher::new().with_level(Level::Error));
    }

    #[test]
    fn allowed_warnings() {
        let events = Events {
            events: vec![
                event(Level::Warn, "dispatcher::lifecycle", "1 connection(s) abandoned"),
                event(Level::Info, "dispatcher::lifecycle", "shutdown complete"),
            ],
        };
        events.assert_no_unexpected_errors_or_warnings(&[EventMatcher::new()
            .with_level(Level::Warn)
            .with_message_containing("abandoned")]);
        events.assert_no_unexpected_errors_or_warnings(&[
            EventMatcher::new()
                .with_level(Level::Warn)
                .with_count(Count::GreaterThanOrEqual(1)),
            EventMatcher::new()
                .with_level(Level::Error)
                .with_count(Count::Any),
        ]);
    }

    #[test]
    #[should_panic(expected = "Any ERROR or WARN events that occur in integration tests must be explicitly allowed")]
    fn unexpected_error() {
        Events {
            events: vec![event(Level::Error, "dispatcher", "failed to bind")],
        }
        .assert_no_unexpected_errors_or_warnings(&[]);
    }

    #[test]
    #[should_panic(expected = "2 times but actually matched 1 times")]
    fn allowed_warning_count_mismatch() {
        Events {
            events: vec![event(Level::Warn, "dispatcher", "slow")],
        }
        .assert_no_unexpected_errors_or_warnings(&[EventMatcher::new()
            .with_message("slow")
            .with_count(Count::Times(2))]);
    }

    #[test]
    #[should_panic(expected = "was not found in the list of events")]
    fn assert_contains_panics() {
        Events { events: vec![] }.assert_contains(&EventMatcher::new());
    }
}
