//! Events as emitted by the JSON formatter of `tracing-subscriber`.
use nu_ansi_term::{Color, Style};
use serde::Deserialize;
use std::fmt::{self, Display};

pub type JsonMap = serde_json::Map<String, serde_json::Value>;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Event {
    pub timestamp: String,
    pub level: Level,
    pub target: String,
    pub fields: Fields,
    #[serde(default)]
    pub span: JsonMap,
    #[serde(default)]
    pub spans: Vec<JsonMap>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Fields {
    #[serde(default)]
    pub message: String,
    /// Every field other than `message`
    #[serde(flatten)]
    pub fields: JsonMap,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Event {
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// The value of a field as a string, strings are returned without their quotes.
    pub fn field(&self, name: &str) -> Option<String> {
        self.fields.fields.get(name).map(|value| match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Error => write!(f, "{}", Color::Red.paint("ERROR")),
            Level::Warn => write!(f, "{}", Color::Yellow.paint(" WARN")),
            Level::Info => write!(f, "{}", Color::Green.paint(" INFO")),
            Level::Debug => write!(f, "{}", Color::Blue.paint("DEBUG")),
            Level::Trace => write!(f, "{}", Color::Purple.paint("TRACE")),
        }
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dimmed = Style::new().dimmed();
        write!(
            f,
            "{} {} {}{} {}",
            dimmed.paint(&self.timestamp),
            self.level,
            dimmed.paint(&self.target),
            dimmed.paint(":"),
            self.fields.message
        )?;

        for (key, value) in &self.fields.fields {
            write!(f, " {}{}", Style::new().italic().paint(key), dimmed.paint("="))?;
            match value {
                // Printed raw so that multi-line strings such as stack dumps stay readable.
                serde_json::Value::String(value) => write!(f, "{value}")?,
                value => write!(f, "{value}")?,
            }
        }
        Ok(())
    }
}
