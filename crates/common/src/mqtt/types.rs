use bytes::Bytes;

/// An owned message received from the broker.
///
/// Owning the topic and payload lets the request travel through Tower
/// middleware without borrowing from the event loop.
#[derive(Debug, Clone)]
pub struct InboundPublish {
    pub topic: String,
    pub payload: Bytes,
}

impl InboundPublish {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// What became of one consumed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Message was fully handled.
    Handled,
    /// Message was discarded; the reason is logged, never redelivered.
    Dropped(String),
}

impl ConsumeOutcome {
    pub fn handled() -> Self {
        Self::Handled
    }

    pub fn dropped(reason: impl Into<String>) -> Self {
        Self::Dropped(reason.into())
    }

    pub fn is_handled(&self) -> bool {
        matches!(self, Self::Handled)
    }
}
