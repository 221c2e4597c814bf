//! Flow status — the prospect-journey state machine.

use serde::{Deserialize, Serialize};

/// Status of a prospect flow.
///
/// Progression:
/// `FormStarted` → `FormCompleted` → `Qualifying` → {`Qualified`, `Disqualified`,
/// `SpamDetected`}; `Qualified` → `SchedulingOptions` → `BookingPending` →
/// {`BookingConfirmed`, `BookingFailed`}. Any non-terminal status can fall to
/// `Abandoned` via the inactivity sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    /// Respondent opened the form; flow row created.
    FormStarted,
    /// All answers submitted.
    FormCompleted,
    /// Qualification in progress (spam gate, scoring, oracle call).
    Qualifying,
    /// Prospect passed qualification.
    Qualified,
    /// Prospect failed qualification.
    Disqualified,
    /// Response tripped the spam gate.
    SpamDetected,
    /// Scheduling options shown (instant slots, curated picks, or approval hold).
    SchedulingOptions,
    /// A slot is claimed and awaiting calendar confirmation.
    BookingPending,
    /// Booking confirmed on the calendar.
    BookingConfirmed,
    /// Calendar rejected the booking.
    BookingFailed,
    /// Reaped for inactivity. Reopenable via the explicit recovery action.
    Abandoned,
}

impl FlowStatus {
    /// Check if this status allows transitioning to another status.
    ///
    /// `Abandoned` is reachable from every non-terminal status; it is listed
    /// per-edge so the table stays the single source of truth.
    pub fn can_transition_to(&self, target: FlowStatus) -> bool {
        use FlowStatus::*;

        matches!(
            (self, target),
            // Form lifecycle
            (FormStarted, FormCompleted) |
            (FormCompleted, Qualifying) |
            // Qualification outcomes
            (Qualifying, Qualified) | (Qualifying, Disqualified) | (Qualifying, SpamDetected) |
            // Scheduling lifecycle
            (Qualified, SchedulingOptions) |
            (SchedulingOptions, BookingPending) |
            (BookingPending, BookingConfirmed) | (BookingPending, BookingFailed) |
            // Inactivity reaping from any non-terminal status
            (FormStarted, Abandoned) | (FormCompleted, Abandoned) |
            (Qualifying, Abandoned) | (Qualified, Abandoned) |
            (SchedulingOptions, Abandoned) | (BookingPending, Abandoned)
        )
    }

    /// Check if this is a terminal (absorbing) status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Disqualified
                | Self::SpamDetected
                | Self::BookingConfirmed
                | Self::BookingFailed
                | Self::Abandoned
        )
    }

    /// Check if the flow is active (not terminal).
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// All non-terminal statuses, in lifecycle order. Used by the reaper scan.
    pub fn active_statuses() -> &'static [FlowStatus] {
        &[
            Self::FormStarted,
            Self::FormCompleted,
            Self::Qualifying,
            Self::Qualified,
            Self::SchedulingOptions,
            Self::BookingPending,
        ]
    }

    /// Stable string form used in the database and wire payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FormStarted => "form_started",
            Self::FormCompleted => "form_completed",
            Self::Qualifying => "qualifying",
            Self::Qualified => "qualified",
            Self::Disqualified => "disqualified",
            Self::SpamDetected => "spam_detected",
            Self::SchedulingOptions => "scheduling_options",
            Self::BookingPending => "booking_pending",
            Self::BookingConfirmed => "booking_confirmed",
            Self::BookingFailed => "booking_failed",
            Self::Abandoned => "abandoned",
        }
    }
}

impl std::fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FlowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "form_started" => Ok(Self::FormStarted),
            "form_completed" => Ok(Self::FormCompleted),
            "qualifying" => Ok(Self::Qualifying),
            "qualified" => Ok(Self::Qualified),
            "disqualified" => Ok(Self::Disqualified),
            "spam_detected" => Ok(Self::SpamDetected),
            "scheduling_options" => Ok(Self::SchedulingOptions),
            "booking_pending" => Ok(Self::BookingPending),
            "booking_confirmed" => Ok(Self::BookingConfirmed),
            "booking_failed" => Ok(Self::BookingFailed),
            "abandoned" => Ok(Self::Abandoned),
            other => Err(format!("unknown flow status: {other}")),
        }
    }
}

/// How a qualified prospect is offered meeting times.
///
/// Fixed per event type at configuration time, honored when a flow reaches
/// `SchedulingOptions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingMode {
    /// Show full availability immediately.
    #[default]
    Instant,
    /// AI proposes 2–3 candidate times.
    Curated,
    /// A human must approve before booking opens.
    Approval,
}

impl SchedulingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instant => "instant",
            Self::Curated => "curated",
            Self::Approval => "approval",
        }
    }
}

impl std::fmt::Display for SchedulingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SchedulingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instant" => Ok(Self::Instant),
            "curated" => Ok(Self::Curated),
            "approval" => Ok(Self::Approval),
            other => Err(format!("unknown scheduling mode: {other}")),
        }
    }
}

/// Priority assigned by qualification analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityLevel {
    Low,
    Medium,
    High,
    Urgent,
}

impl PriorityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    /// Map a 0–100 qualification score to a priority band.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=39 => Self::Low,
            40..=69 => Self::Medium,
            70..=89 => Self::High,
            _ => Self::Urgent,
        }
    }
}

impl std::fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PriorityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            other => Err(format!("unknown priority level: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        use FlowStatus::*;
        let transitions = [
            (FormStarted, FormCompleted),
            (FormCompleted, Qualifying),
            (Qualifying, Qualified),
            (Qualifying, Disqualified),
            (Qualifying, SpamDetected),
            (Qualified, SchedulingOptions),
            (SchedulingOptions, BookingPending),
            (BookingPending, BookingConfirmed),
            (BookingPending, BookingFailed),
        ];
        for (from, to) in transitions {
            assert!(from.can_transition_to(to), "{from} should transition to {to}");
        }
    }

    #[test]
    fn any_active_status_can_abandon() {
        for status in FlowStatus::active_statuses() {
            assert!(
                status.can_transition_to(FlowStatus::Abandoned),
                "{status} should be reapable"
            );
        }
    }

    #[test]
    fn invalid_transitions() {
        use FlowStatus::*;
        // Skipping stages
        assert!(!FormStarted.can_transition_to(Qualifying));
        assert!(!FormCompleted.can_transition_to(Qualified));
        assert!(!Qualified.can_transition_to(BookingPending));
        // Going backward
        assert!(!Qualifying.can_transition_to(FormCompleted));
        assert!(!BookingPending.can_transition_to(SchedulingOptions));
        // Out of terminal states
        assert!(!Disqualified.can_transition_to(Qualifying));
        assert!(!SpamDetected.can_transition_to(Qualified));
        assert!(!BookingConfirmed.can_transition_to(BookingPending));
        assert!(!Abandoned.can_transition_to(FormStarted));
    }

    #[test]
    fn terminal_statuses_cannot_abandon() {
        use FlowStatus::*;
        for status in [Disqualified, SpamDetected, BookingConfirmed, BookingFailed, Abandoned] {
            assert!(status.is_terminal());
            assert!(!status.can_transition_to(Abandoned));
        }
    }

    #[test]
    fn status_string_roundtrip() {
        use FlowStatus::*;
        for status in [
            FormStarted, FormCompleted, Qualifying, Qualified, Disqualified,
            SpamDetected, SchedulingOptions, BookingPending, BookingConfirmed,
            BookingFailed, Abandoned,
        ] {
            let parsed: FlowStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn priority_bands() {
        assert_eq!(PriorityLevel::from_score(0), PriorityLevel::Low);
        assert_eq!(PriorityLevel::from_score(40), PriorityLevel::Medium);
        assert_eq!(PriorityLevel::from_score(70), PriorityLevel::High);
        assert_eq!(PriorityLevel::from_score(95), PriorityLevel::Urgent);
    }
}
