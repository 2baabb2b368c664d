use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Delivery category of a device message.
///
/// The category decides the broker topic, the QoS level and, on the
/// internal side, which sink persists the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[serde(rename = "timeseries")]
    TimeSeries,
    File,
    Event,
    Response,
    Command,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::TimeSeries,
        Category::File,
        Category::Event,
        Category::Response,
        Category::Command,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimeSeries => "timeseries",
            Self::File => "file",
            Self::Event => "event",
            Self::Response => "response",
            Self::Command => "command",
        }
    }

    /// Broker QoS for this category. Files get exactly-once delivery,
    /// everything else at-least-once.
    pub fn qos(&self) -> QosLevel {
        match self {
            Self::File => QosLevel::ExactlyOnce,
            Self::TimeSeries | Self::Event | Self::Response | Self::Command => {
                QosLevel::AtLeastOnce
            }
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeseries" => Ok(Self::TimeSeries),
            "file" => Ok(Self::File),
            "event" => Ok(Self::Event),
            "response" => Ok(Self::Response),
            "command" => Ok(Self::Command),
            other => Err(format!(
                "unknown data type '{}', expected one of: timeseries, file, event, response, command",
                other
            )),
        }
    }
}

/// Broker delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QosLevel {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QosLevel {
    pub fn level(&self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}
