//! Deposit deep links (`flowsplit://deposit/{id}/{screen}`) and the
//! notification types that open them.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::flow::FlowStep;

pub const LINK_SCHEME: &str = "flowsplit";
pub const WEB_HOST: &str = "flowsplit.app";

#[derive(Error, Debug, PartialEq)]
pub enum LinkError {
    #[error("invalid link: {0}")]
    Url(#[from] url::ParseError),
    #[error("unsupported link host or scheme: {0}")]
    Unsupported(String),
    #[error("not a deposit link: {0}")]
    NotDeposit(String),
    #[error("unknown screen {0}")]
    UnknownScreen(String),
}

/// A link into one deposit's split flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeepLink {
    pub deposit_id: String,
    pub step: FlowStep,
}

impl DeepLink {
    pub fn new(deposit_id: impl Into<String>, step: FlowStep) -> Self {
        Self {
            deposit_id: deposit_id.into(),
            step,
        }
    }

    /// Parse `flowsplit://deposit/{id}[/{screen}]` or the
    /// `https://flowsplit.app/deposit/...` form. The screen defaults to allocate.
    pub fn parse(input: &str) -> Result<Self, LinkError> {
        let url = url::Url::parse(input.trim())?;

        let mut segments: Vec<String> = Vec::new();
        match url.scheme() {
            LINK_SCHEME => {
                // custom scheme: "deposit" lands in the host slot
                if let Some(host) = url.host_str() {
                    segments.push(host.to_string());
                }
            }
            "https" | "http" => {
                let host = url.host_str().unwrap_or_default();
                if host != WEB_HOST && !host.ends_with(&format!(".{}", WEB_HOST)) {
                    return Err(LinkError::Unsupported(input.to_string()));
                }
            }
            _ => return Err(LinkError::Unsupported(input.to_string())),
        }
        if let Some(path) = url.path_segments() {
            segments.extend(path.filter(|s| !s.is_empty()).map(str::to_string));
        }

        let mut parts = segments.into_iter();
        if parts.next().as_deref() != Some("deposit") {
            return Err(LinkError::NotDeposit(input.to_string()));
        }
        let deposit_id = parts
            .next()
            .ok_or_else(|| LinkError::NotDeposit(input.to_string()))?;

        let step = match parts.next() {
            None => FlowStep::Allocate,
            Some(screen) => Self::step_for_screen(&screen)?,
        };

        Ok(Self { deposit_id, step })
    }

    fn step_for_screen(screen: &str) -> Result<FlowStep, LinkError> {
        match FlowStep::from_str(screen) {
            Some(step) if step != FlowStep::Setup => Ok(step),
            _ => Err(LinkError::UnknownScreen(screen.to_string())),
        }
    }
}

impl fmt::Display for DeepLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://deposit/{}/{}",
            LINK_SCHEME,
            self.deposit_id,
            self.step.as_str()
        )
    }
}

/// Push notification kinds that carry a deposit id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    DepositReceived,
    SplitComplete,
    ManualActionRequired,
}

impl NotificationType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "deposit_received" => Some(Self::DepositReceived),
            "split_complete" => Some(Self::SplitComplete),
            "manual_action_required" => Some(Self::ManualActionRequired),
            _ => None,
        }
    }

    /// Screen the notification opens
    pub fn step(&self) -> FlowStep {
        match self {
            NotificationType::DepositReceived => FlowStep::Allocate,
            NotificationType::SplitComplete => FlowStep::Complete,
            NotificationType::ManualActionRequired => FlowStep::Processing,
        }
    }
}

/// Notification payload as delivered by the push service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationData {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub deposit_id: Option<String>,
}

impl NotificationData {
    /// Link to open for this payload; `None` for unknown types or a missing deposit
    pub fn link(&self) -> Option<DeepLink> {
        let kind = NotificationType::from_str(self.kind.as_deref()?)?;
        let deposit_id = self.deposit_id.as_deref().filter(|id| !id.is_empty())?;
        Some(DeepLink::new(deposit_id, kind.step()))
    }
}
