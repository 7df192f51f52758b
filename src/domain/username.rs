use super::address::{Address, Timestamp};
use crate::error::PaymentError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 20;

/// A username that has passed validation.
///
/// Rules: 3-20 characters, starts with a lowercase ASCII letter, continues
/// with lowercase letters, digits or underscores, never ends with an
/// underscore and never contains two underscores in a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    pub fn parse(raw: &str) -> Result<Self, PaymentError> {
        if is_valid(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(PaymentError::InvalidIdentifier(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_valid(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    if bytes.len() < MIN_USERNAME_LEN || bytes.len() > MAX_USERNAME_LEN {
        return false;
    }
    if !bytes[0].is_ascii_lowercase() || bytes[bytes.len() - 1] == b'_' {
        return false;
    }
    let mut previous = bytes[0];
    for &b in &bytes[1..] {
        let allowed = b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_';
        if !allowed || (b == b'_' && previous == b'_') {
            return false;
        }
        previous = b;
    }
    true
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Username {
    type Error = PaymentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Username> for String {
    fn from(username: Username) -> Self {
        username.0
    }
}

/// Registry entry for a claimed username.
///
/// Claims are permanent; `controller` and `recipient` are never zero once
/// the record exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernameRecord {
    /// Who may change this record and migrate its streams.
    pub controller: Address,
    /// Where payments are currently directed.
    pub recipient: Address,
    /// Audit trail only; never used to gate behaviour.
    pub last_update_time: Timestamp,
}

impl UsernameRecord {
    pub fn new(
        controller: Address,
        recipient: Address,
        now: Timestamp,
    ) -> Result<Self, PaymentError> {
        if controller.is_zero() {
            return Err(PaymentError::InvalidController);
        }
        if recipient.is_zero() {
            return Err(PaymentError::InvalidRecipient);
        }
        Ok(Self {
            controller,
            recipient,
            last_update_time: now,
        })
    }

    pub fn set_recipient(&mut self, recipient: Address, now: Timestamp) -> Result<(), PaymentError> {
        if recipient.is_zero() {
            return Err(PaymentError::InvalidRecipient);
        }
        self.recipient = recipient;
        self.last_update_time = now;
        Ok(())
    }

    pub fn set_controller(
        &mut self,
        controller: Address,
        now: Timestamp,
    ) -> Result<(), PaymentError> {
        if controller.is_zero() {
            return Err(PaymentError::InvalidController);
        }
        self.controller = controller;
        self.last_update_time = now;
        Ok(())
    }
}
