use std::time::Instant;

use crate::config::NOTICE_TTL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Error,
}

/// A transient status message that dismisses itself after [`NOTICE_TTL`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
    raised_at: Instant,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self::raised(NoticeKind::Success, message, Instant::now())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::raised(NoticeKind::Error, message, Instant::now())
    }

    pub fn raised(kind: NoticeKind, message: impl Into<String>, raised_at: Instant) -> Self {
        Self {
            kind,
            message: message.into(),
            raised_at,
        }
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.raised_at) >= NOTICE_TTL
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }
}
