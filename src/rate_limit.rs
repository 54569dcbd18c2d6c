//! Per-subject, per-action rate limiting.
//!
//! This module provides:
//! - [`ActionType`]: the enumerated set of limited actions.
//! - [`RateLimitPolicy`]: the `action -> {free, premium, window}` table.
//! - [`RateLimiter`]: a fixed-window counter over a [`WindowStore`](crate::store::WindowStore).
//! - [`RateLimitLayer`]: Tower middleware that enforces one action per service.
//!
//! # Architecture
//!
//! - **Middleware**: `RateLimitLayer` wraps your service and asks the limiter
//!   before every call.
//! - **Logic**: `RateLimiter` resolves the tier limit and interprets outcomes.
//! - **Storage**: the window store performs the reset-or-consume step
//!   atomically, so concurrent requests can never overshoot a limit.

use crate::error::ValidationError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub mod fixed_window;
pub mod middleware;
pub mod policy;

pub use fixed_window::RateLimiter;
pub use middleware::{RateLimitLayer, RateLimitService, RateLimitSubject};
pub use policy::{ActionLimits, RateLimitPolicy};

/// Actions subject to per-caller limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ActionType {
    /// One AI-chat turn.
    AiChat,
    /// Creating a post.
    PostCreate,
    /// Creating a comment.
    CommentCreate,
    /// Uploading media.
    MediaUpload,
    /// Starting a live broadcast.
    BroadcastStart,
    /// Emergency / safety actions (SOS, reports).
    Emergency,
    /// Generic API calls.
    ApiCall,
}

impl ActionType {
    /// Number of actions in the table.
    pub const COUNT: usize = 7;

    /// Every action, in table order.
    pub const ALL: [ActionType; Self::COUNT] = [
        ActionType::AiChat,
        ActionType::PostCreate,
        ActionType::CommentCreate,
        ActionType::MediaUpload,
        ActionType::BroadcastStart,
        ActionType::Emergency,
        ActionType::ApiCall,
    ];

    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::AiChat => "ai_chat",
            ActionType::PostCreate => "post_create",
            ActionType::CommentCreate => "comment_create",
            ActionType::MediaUpload => "media_upload",
            ActionType::BroadcastStart => "broadcast_start",
            ActionType::Emergency => "emergency",
            ActionType::ApiCall => "api_call",
        }
    }

    /// Safety-critical actions must never be the bottleneck.
    pub fn is_safety_critical(self) -> bool {
        matches!(self, ActionType::Emergency)
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionType::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownAction(s.to_string()))
    }
}

/// Machine-checkable result of a limiter call.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RateLimitOutcome {
    /// Whether the action may proceed.
    pub success: bool,
    /// Units left in the current window (0 on failure).
    pub remaining: u32,
    /// Time until the current window resets.
    pub reset_in: Duration,
    /// Limit for the caller's tier.
    pub limit: u32,
}
