/// Line lifecycle state.
///
/// State transitions:
/// ```text
/// open → started ↔ stopped
///   ↓       ↓         ↓
///   └─────→ closed ←──┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    Open,
    Started,
    Stopped,
    Closed,
}

impl LineState {
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether `start` is legal from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Open | Self::Stopped)
    }
}
