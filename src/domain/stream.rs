use super::address::{Address, PaymentId, Timestamp};
use super::username::Username;
use crate::error::PaymentError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tokens per second, in the flow ledger's fixed precision.
///
/// The ledger counts every rate with the same number of decimals regardless
/// of the token's own decimals; the adapter converts at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct FlowRate(u128);

impl FlowRate {
    pub const ZERO: Self = Self(0);

    /// A strictly positive rate, as required for anything that will flow.
    pub fn new(per_second: u128) -> Result<Self, PaymentError> {
        if per_second == 0 {
            Err(PaymentError::ZeroFlowRate)
        } else {
            Ok(Self(per_second))
        }
    }

    pub fn value(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }
}

impl fmt::Display for FlowRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/s", self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Active,
    Paused,
    Cancelled,
}

impl StreamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamState::Active => "active",
            StreamState::Paused => "paused",
            StreamState::Cancelled => "cancelled",
        }
    }
}

/// A continuous, funded-ahead payment to a username.
///
/// The funded position on the ledger is pinned to `recipient_at_creation`,
/// which only moves when the stream is migrated.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Stream {
    pub id: PaymentId,
    pub username: Username,
    pub token: Address,
    /// The configured rate. Kept while paused so resume restores it exactly.
    pub flow_rate: FlowRate,
    pub state: StreamState,
    pub start_time: Timestamp,
    /// The last address the ledger position was opened or migrated to.
    pub recipient_at_creation: Address,
}

impl Stream {
    /// Deterministic id over the stream's creation parameters and the
    /// per-user creation sequence.
    pub fn derive_id(
        username: &Username,
        token: &Address,
        flow_rate: FlowRate,
        created_at: Timestamp,
        sequence: u64,
    ) -> PaymentId {
        PaymentId::digest(&[
            b"stream",
            username.as_str().as_bytes(),
            token.as_bytes(),
            &flow_rate.value().to_be_bytes(),
            &created_at.to_be_bytes(),
            &sequence.to_be_bytes(),
        ])
    }

    /// Rate the ledger position currently flows at.
    pub fn ledger_rate(&self) -> FlowRate {
        match self.state {
            StreamState::Active => self.flow_rate,
            StreamState::Paused | StreamState::Cancelled => FlowRate::ZERO,
        }
    }

    /// Active or Paused; cancelled streams never transition again.
    pub fn is_live(&self) -> bool {
        self.state != StreamState::Cancelled
    }

    pub fn needs_migration(&self, current_recipient: &Address) -> bool {
        self.is_live() && self.recipient_at_creation != *current_recipient
    }

    fn ensure_live(&self) -> Result<(), PaymentError> {
        if self.is_live() {
            Ok(())
        } else {
            Err(PaymentError::StreamNotActive(self.id.to_string()))
        }
    }

    fn ensure_state(&self, expected: StreamState) -> Result<(), PaymentError> {
        self.ensure_live()?;
        if self.state == expected {
            Ok(())
        } else {
            Err(PaymentError::StreamStateMismatch {
                id: self.id.to_string(),
                expected: expected.as_str(),
                actual: self.state.as_str(),
            })
        }
    }

    pub fn check_can_update_rate(&self, new_rate: FlowRate) -> Result<(), PaymentError> {
        self.ensure_state(StreamState::Active)?;
        if new_rate.is_zero() {
            return Err(PaymentError::ZeroFlowRate);
        }
        if new_rate == self.flow_rate {
            return Err(PaymentError::FlowRateUnchanged);
        }
        Ok(())
    }

    pub fn check_can_pause(&self) -> Result<(), PaymentError> {
        self.ensure_state(StreamState::Active)
    }

    pub fn check_can_resume(&self) -> Result<(), PaymentError> {
        self.ensure_state(StreamState::Paused)
    }

    pub fn check_can_cancel(&self) -> Result<(), PaymentError> {
        self.ensure_live()
    }

    pub fn check_can_migrate(&self) -> Result<(), PaymentError> {
        self.ensure_live()
    }

    pub fn set_rate(&mut self, new_rate: FlowRate) {
        self.flow_rate = new_rate;
    }

    pub fn pause(&mut self) {
        self.state = StreamState::Paused;
    }

    pub fn resume(&mut self) {
        self.state = StreamState::Active;
    }

    pub fn cancel(&mut self) {
        self.state = StreamState::Cancelled;
    }

    pub fn migrate_to(&mut self, recipient: Address) {
        self.recipient_at_creation = recipient;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> Stream {
        let username = Username::parse("alice").unwrap();
        let token = Address::derive("usdc");
        let rate = FlowRate::new(1000).unwrap();
        Stream {
            id: Stream::derive_id(&username, &token, rate, 100, 0),
            username,
            token,
            flow_rate: rate,
            state: StreamState::Active,
            start_time: 100,
            recipient_at_creation: Address::derive("bob"),
        }
    }

    #[test]
    fn test_flow_rate_validation() {
        assert!(FlowRate::new(1).is_ok());
        assert!(matches!(FlowRate::new(0), Err(PaymentError::ZeroFlowRate)));
    }

    #[test]
    fn test_pause_resume_preserves_rate() {
        let mut s = stream();
        s.check_can_pause().unwrap();
        s.pause();
        assert_eq!(s.ledger_rate(), FlowRate::ZERO);
        assert_eq!(s.flow_rate, FlowRate::new(1000).unwrap());

        assert!(matches!(
            s.check_can_pause(),
            Err(PaymentError::StreamStateMismatch { .. })
        ));
        s.check_can_resume().unwrap();
        s.resume();
        assert_eq!(s.ledger_rate(), FlowRate::new(1000).unwrap());
    }

    #[test]
    fn test_cancelled_is_terminal() {
        let mut s = stream();
        s.cancel();
        assert!(!s.is_live());
        assert!(matches!(s.check_can_pause(), Err(PaymentError::StreamNotActive(_))));
        assert!(matches!(s.check_can_resume(), Err(PaymentError::StreamNotActive(_))));
        assert!(matches!(s.check_can_cancel(), Err(PaymentError::StreamNotActive(_))));
        assert!(matches!(
            s.check_can_update_rate(FlowRate::new(5).unwrap()),
            Err(PaymentError::StreamNotActive(_))
        ));
        assert!(!s.needs_migration(&Address::derive("carol")));
    }

    #[test]
    fn test_rate_update_rules() {
        let s = stream();
        assert!(matches!(
            s.check_can_update_rate(FlowRate::ZERO),
            Err(PaymentError::ZeroFlowRate)
        ));
        assert!(matches!(
            s.check_can_update_rate(FlowRate::new(1000).unwrap()),
            Err(PaymentError::FlowRateUnchanged)
        ));
        assert!(s.check_can_update_rate(FlowRate::new(2000).unwrap()).is_ok());
    }

    #[test]
    fn test_id_depends_on_sequence() {
        let s = stream();
        let again = Stream::derive_id(&s.username, &s.token, s.flow_rate, 100, 0);
        let next = Stream::derive_id(&s.username, &s.token, s.flow_rate, 100, 1);
        assert_eq!(s.id, again);
        assert_ne!(s.id, next);
    }
}
