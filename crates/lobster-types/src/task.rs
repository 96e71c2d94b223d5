use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LobsterError, Result};
use crate::wallet::{OpToken, Reservation};
use crate::{AccountId, Credits, ListingId, QuoteId, TaskId};

/// Task states. Legacy names from older clients are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[serde(alias = "pending")]
    Submitted,
    #[serde(alias = "assigned", alias = "running")]
    Working,
    /// Reserved. No event leads here yet.
    InputRequired,
    Completed,
    #[serde(alias = "timed_out")]
    Failed,
    #[serde(alias = "cancelled")]
    Canceled,
    Rejected,
}

/// Events that drive task state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEvent {
    Accept,
    Reject,
    Start,
    SubmitResult,
    Fail,
    Timeout,
    Cancel,
}

/// The ledger call a transition requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEffect {
    None,
    Settle,
    Refund,
}

/// Why a task ended up `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SellerReported,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub to: TaskState,
    pub effect: LedgerEffect,
}

impl Transition {
    const fn new(to: TaskState, effect: LedgerEffect) -> Self {
        Self { to, effect }
    }
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled | TaskState::Rejected
        )
    }

    /// The transition table. Returns the target state and the ledger effect
    /// owed at that transition, or an error if the event is not allowed here.
    pub fn transition(self, event: TaskEvent) -> Result<Transition> {
        use LedgerEffect as E;
        use TaskState as S;

        match (self, event) {
            (S::Submitted, TaskEvent::Accept) => Ok(Transition::new(S::Working, E::None)),
            (S::Submitted, TaskEvent::Reject) => Ok(Transition::new(S::Rejected, E::Refund)),

            (S::Working, TaskEvent::Start) => Ok(Transition::new(S::Working, E::None)),
            (S::Working, TaskEvent::SubmitResult) => {
                Ok(Transition::new(S::Completed, E::Settle))
            }

            (S::Submitted | S::Working, TaskEvent::Fail | TaskEvent::Timeout) => {
                Ok(Transition::new(S::Failed, E::Refund))
            }
            (S::Submitted | S::Working, TaskEvent::Cancel) => {
                Ok(Transition::new(S::Canceled, E::Refund))
            }

            (from, event) => Err(LobsterError::InvalidTransition { from, event }),
        }
    }
}

/// One unit of paid work requested by a buyer from a seller agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub buyer: AccountId,
    pub seller: AccountId,
    pub listing_id: ListingId,
    pub quote_id: Option<QuoteId>,
    pub price: Credits,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub tokens_used: Option<u64>,
    pub state: TaskState,
    pub failure: Option<FailureKind>,
    /// Execution window granted once the seller accepts.
    pub timeout_secs: u64,
    pub deadline: DateTime<Utc>,
    /// Held funds. Cleared once the terminal ledger effect has been applied.
    pub reservation: Option<Reservation>,
    /// Terminal ledger effect that was applied.
    pub outcome: Option<LedgerEffect>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub terminal_at: Option<DateTime<Utc>>,
}

impl Task {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: TaskId,
        buyer: AccountId,
        seller: AccountId,
        listing_id: ListingId,
        price: Credits,
        input: serde_json::Value,
        timeout_secs: u64,
        submit_timeout: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            buyer,
            seller,
            listing_id,
            quote_id: None,
            price,
            input,
            output: None,
            error: None,
            tokens_used: None,
            state: TaskState::Submitted,
            failure: None,
            timeout_secs,
            deadline: now + submit_timeout,
            reservation: Some(Reservation {
                owner: buyer,
                amount: price,
                freeze_op: OpToken::freeze(id),
            }),
            outcome: None,
            version: 0,
            created_at: now,
            updated_at: now,
            terminal_at: None,
        }
    }

    pub fn with_quote(mut self, quote_id: QuoteId) -> Self {
        self.quote_id = Some(quote_id);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && self.deadline <= now
    }

    /// Terminal and still waiting for its ledger effect to be confirmed.
    pub fn needs_settlement(&self) -> bool {
        self.is_terminal() && self.reservation.is_some()
    }

    /// Apply a state transition event, bumping the version.
    pub fn apply_event(&mut self, event: TaskEvent, now: DateTime<Utc>) -> Result<Transition> {
        let transition = self.state.transition(event)?;

        if self.state == TaskState::Submitted && transition.to == TaskState::Working {
            let window = i64::try_from(self.timeout_secs).unwrap_or(i64::MAX);
            self.deadline = now + Duration::seconds(window);
        }
        match event {
            TaskEvent::Fail => self.failure = Some(FailureKind::SellerReported),
            TaskEvent::Timeout => self.failure = Some(FailureKind::TimedOut),
            _ => {}
        }
        if transition.to.is_terminal() {
            self.terminal_at = Some(now);
        }

        self.state = transition.to;
        self.version += 1;
        self.updated_at = now;
        Ok(transition)
    }

    /// Record that the terminal ledger effect went through.
    pub fn finish_settlement(&mut self, effect: LedgerEffect, now: DateTime<Utc>) {
        self.reservation = None;
        self.outcome = Some(effect);
        self.version += 1;
        self.updated_at = now;
    }

    /// The effect owed by a terminal task, derived from how it ended.
    pub fn owed_effect(&self) -> LedgerEffect {
        match self.state {
            TaskState::Completed => LedgerEffect::Settle,
            TaskState::Failed | TaskState::Canceled | TaskState::Rejected => LedgerEffect::Refund,
            _ => LedgerEffect::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn task() -> Task {
        Task::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            200,
            serde_json::json!({"text": "hello"}),
            60,
            Duration::seconds(300),
        )
    }

    #[test]
    fn test_happy_path() {
        let mut state = TaskState::Submitted;
        for event in [TaskEvent::Accept, TaskEvent::Start, TaskEvent::Start] {
            let t = state.transition(event).unwrap();
            assert_eq!(t.effect, LedgerEffect::None);
            state = t.to;
        }
        let t = state.transition(TaskEvent::SubmitResult).unwrap();
        assert_eq!(t.to, TaskState::Completed);
        assert_eq!(t.effect, LedgerEffect::Settle);
    }

    #[test]
    fn test_refunding_transitions() {
        let cases = [
            (TaskState::Submitted, TaskEvent::Reject, TaskState::Rejected),
            (TaskState::Submitted, TaskEvent::Fail, TaskState::Failed),
            (TaskState::Working, TaskEvent::Fail, TaskState::Failed),
            (TaskState::Working, TaskEvent::Timeout, TaskState::Failed),
            (TaskState::Submitted, TaskEvent::Cancel, TaskState::Canceled),
            (TaskState::Working, TaskEvent::Cancel, TaskState::Canceled),
        ];
        for (from, event, to) in cases {
            let t = from.transition(event).unwrap();
            assert_eq!(t.to, to);
            assert_eq!(t.effect, LedgerEffect::Refund);
        }
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        let events = [
            TaskEvent::Accept,
            TaskEvent::Reject,
            TaskEvent::Start,
            TaskEvent::SubmitResult,
            TaskEvent::Fail,
            TaskEvent::Timeout,
            TaskEvent::Cancel,
        ];
        for from in [
            TaskState::Completed,
            TaskState::Failed,
            TaskState::Canceled,
            TaskState::Rejected,
        ] {
            for event in events {
                assert!(matches!(
                    from.transition(event),
                    Err(LobsterError::InvalidTransition { .. })
                ));
            }
        }
    }

    #[test]
    fn test_input_required_is_unsupported() {
        assert!(TaskState::InputRequired.transition(TaskEvent::Start).is_err());
        assert!(!TaskState::InputRequired.is_terminal());
    }

    #[test]
    fn test_start_requires_accept() {
        assert!(TaskState::Submitted.transition(TaskEvent::Start).is_err());
        assert!(TaskState::Submitted.transition(TaskEvent::SubmitResult).is_err());
    }

    #[test]
    fn test_legacy_state_names() {
        let parse = |s: &str| serde_json::from_value::<TaskState>(serde_json::json!(s)).unwrap();
        assert_eq!(parse("assigned"), TaskState::Working);
        assert_eq!(parse("running"), TaskState::Working);
        assert_eq!(parse("pending"), TaskState::Submitted);
        assert_eq!(parse("timed_out"), TaskState::Failed);
        assert_eq!(parse("cancelled"), TaskState::Canceled);
        assert_eq!(
            serde_json::to_value(TaskState::Canceled).unwrap(),
            serde_json::json!("canceled")
        );
    }

    #[test]
    fn test_accept_moves_deadline() {
        let mut t = task();
        let now = t.created_at + Duration::seconds(10);
        t.apply_event(TaskEvent::Accept, now).unwrap();
        assert_eq!(t.deadline, now + Duration::seconds(60));
        assert_eq!(t.version, 1);
    }

    #[test]
    fn test_timeout_marks_failure_kind() {
        let mut t = task();
        let now = Utc::now();
        t.apply_event(TaskEvent::Timeout, now).unwrap();
        assert_eq!(t.state, TaskState::Failed);
        assert_eq!(t.failure, Some(FailureKind::TimedOut));
        assert_eq!(t.terminal_at, Some(now));
        assert!(t.needs_settlement());

        t.finish_settlement(LedgerEffect::Refund, now);
        assert!(t.reservation.is_none());
        assert!(!t.needs_settlement());
        assert_eq!(t.version, 2);
    }
}
