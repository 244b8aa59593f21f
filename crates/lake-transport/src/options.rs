//! Per-socket queueing options.

/// Upper bound on messages queued per socket (pull) or per subscriber (publish).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HighWaterMark {
    /// Queue without limit; nothing is ever dropped
    #[default]
    Unbounded,

    /// Queue at most this many messages. Pushers are slowed down on the
    /// pull side; a lagging subscriber loses messages on the publish side.
    Bounded(usize),
}

/// Options applied to a socket at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SocketOptions {
    /// Queue limit
    pub high_water_mark: HighWaterMark,

    /// Keep only the most recent queued message
    pub conflate: bool,
}

impl SocketOptions {
    /// Every message is delivered and nothing is dropped under burst load.
    pub fn lossless() -> Self {
        Self {
            high_water_mark: HighWaterMark::Unbounded,
            conflate: false,
        }
    }

    /// Sets the queue limit.
    pub fn with_high_water_mark(mut self, high_water_mark: HighWaterMark) -> Self {
        self.high_water_mark = high_water_mark;
        self
    }

    /// Enables or disables conflation.
    pub fn with_conflate(mut self, conflate: bool) -> Self {
        self.conflate = conflate;
        self
    }
}
