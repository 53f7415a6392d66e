//! MQTT topic templates.
//!
//! Templates use printf-style named placeholders, resolved per record:
//!
//! ```text
//! solaredge-mqtt/tele/%(serial)s/SENSOR
//! ```
//!
//! Supported placeholders are `serial` and `channel`. `%%` renders a literal
//! percent sign. Anything else is rejected when the template is parsed, so a
//! template that loads successfully can always be rendered for a record that
//! carries the mapped fields.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::telemetry::TelemetryRecord;

/// Default topic template.
pub const DEFAULT_TOPIC: &str = "solaredge-mqtt/tele/%(serial)s/SENSOR";

/// A placeholder that can appear in a topic template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// Device serial number.
    Serial,
    /// Device channel (sub-device index).
    Channel,
}

impl Placeholder {
    /// Name used inside `%(...)s`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Placeholder::Serial => "serial",
            Placeholder::Channel => "channel",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "serial" => Some(Placeholder::Serial),
            "channel" => Some(Placeholder::Channel),
            _ => None,
        }
    }
}

/// Record fields that feed the template placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicFields {
    /// Field resolved for `%(serial)s`.
    #[serde(default = "default_serial_field")]
    pub serial: String,

    /// Field resolved for `%(channel)s`.
    #[serde(default = "default_channel_field")]
    pub channel: String,
}

fn default_serial_field() -> String {
    "c_serialnumber".to_string()
}

fn default_channel_field() -> String {
    "c_deviceaddress".to_string()
}

impl Default for TopicFields {
    fn default() -> Self {
        Self {
            serial: default_serial_field(),
            channel: default_channel_field(),
        }
    }
}

impl TopicFields {
    fn field_for(&self, placeholder: Placeholder) -> &str {
        match placeholder {
            Placeholder::Serial => &self.serial,
            Placeholder::Channel => &self.channel,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// A parsed topic template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl TopicTemplate {
    /// Parse a template string.
    ///
    /// # Example
    /// ```
    /// use solaredge_common::topic::TopicTemplate;
    ///
    /// let template = TopicTemplate::parse("tele/%(serial)s/%(channel)s").unwrap();
    /// assert_eq!(template.render(|_| Some("x".to_string())).unwrap(), "tele/x/x");
    /// ```
    pub fn parse(template: &str) -> Result<Self> {
        if template.is_empty() {
            return Err(Error::TopicTemplate("template is empty".to_string()));
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars();

        while let Some(c) = chars.next() {
            if c != '%' {
                if c == '+' || c == '#' {
                    return Err(Error::TopicTemplate(format!(
                        "wildcard '{}' is not allowed in a publish topic: {}",
                        c, template
                    )));
                }
                literal.push(c);
                continue;
            }

            match chars.next() {
                Some('%') => literal.push('%'),
                Some('(') => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some(')') => break,
                            Some(c) => name.push(c),
                            None => {
                                return Err(Error::TopicTemplate(format!(
                                    "unterminated placeholder in '{}'",
                                    template
                                )));
                            }
                        }
                    }

                    if chars.next() != Some('s') {
                        return Err(Error::TopicTemplate(format!(
                            "placeholder '%({})' must be followed by 's' in '{}'",
                            name, template
                        )));
                    }

                    let placeholder = Placeholder::from_name(&name).ok_or_else(|| {
                        Error::TopicTemplate(format!(
                            "unknown placeholder '{}' (use serial or channel)",
                            name
                        ))
                    })?;

                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(placeholder));
                }
                Some(other) => {
                    return Err(Error::TopicTemplate(format!(
                        "unsupported format directive '%{}' in '{}'",
                        other, template
                    )));
                }
                None => {
                    return Err(Error::TopicTemplate(format!(
                        "dangling '%' at end of '{}'",
                        template
                    )));
                }
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    /// The template as originally written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the template references a placeholder.
    pub fn uses(&self, placeholder: Placeholder) -> bool {
        self.segments
            .iter()
            .any(|s| *s == Segment::Placeholder(placeholder))
    }

    /// Render the template, resolving placeholders through `lookup`.
    ///
    /// Returns `None` from `lookup` to signal a missing value.
    pub fn render<F>(&self, mut lookup: F) -> std::result::Result<String, Placeholder>
    where
        F: FnMut(Placeholder) -> Option<String>,
    {
        let mut topic = String::with_capacity(self.source.len());

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => topic.push_str(text),
                Segment::Placeholder(p) => topic.push_str(&lookup(*p).ok_or(*p)?),
            }
        }

        Ok(topic)
    }

    /// Render the template for a telemetry record.
    pub fn render_record(&self, record: &TelemetryRecord, fields: &TopicFields) -> Result<String> {
        self.render(|p| record.get(fields.field_for(p)).map(|v| v.to_string()))
            .map_err(|p| Error::MissingTopicField {
                placeholder: p.as_str(),
                field: fields.field_for(p).to_string(),
            })
    }
}

impl std::fmt::Display for TopicTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}
