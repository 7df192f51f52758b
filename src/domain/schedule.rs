use super::address::{Address, PaymentId, Timestamp};
use super::username::Username;
use crate::error::PaymentError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const DAY: u64 = 86_400;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Daily,
    Weekly,
    BiWeekly,
    Monthly,
    Quarterly,
    SemiAnnual,
    Yearly,
}

impl Interval {
    /// Length of one interval. Months are 30 days, years 365.
    pub fn seconds(&self) -> u64 {
        match self {
            Interval::Daily => DAY,
            Interval::Weekly => 7 * DAY,
            Interval::BiWeekly => 14 * DAY,
            Interval::Monthly => 30 * DAY,
            Interval::Quarterly => 90 * DAY,
            Interval::SemiAnnual => 180 * DAY,
            Interval::Yearly => 365 * DAY,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Daily => "daily",
            Interval::Weekly => "weekly",
            Interval::BiWeekly => "biweekly",
            Interval::Monthly => "monthly",
            Interval::Quarterly => "quarterly",
            Interval::SemiAnnual => "semiannual",
            Interval::Yearly => "yearly",
        }
    }
}

impl FromStr for Interval {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(Interval::Daily),
            "weekly" => Ok(Interval::Weekly),
            "biweekly" => Ok(Interval::BiWeekly),
            "monthly" => Ok(Interval::Monthly),
            "quarterly" => Ok(Interval::Quarterly),
            "semiannual" => Ok(Interval::SemiAnnual),
            "yearly" => Ok(Interval::Yearly),
            other => Err(PaymentError::Config(format!("unknown interval {other:?}"))),
        }
    }
}

/// Parameters for a new schedule, before it gets an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSchedule {
    pub token: Address,
    pub amount: u128,
    pub interval: Interval,
    pub is_one_time: bool,
    pub first_payment_date: Timestamp,
}

/// A discrete, interval-based payment. The recipient is resolved at each
/// execution, never stored.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Schedule {
    pub id: PaymentId,
    pub username: Username,
    pub token: Address,
    pub amount: u128,
    pub interval: Interval,
    pub is_one_time: bool,
    pub active: bool,
    pub first_payment_date: Timestamp,
    pub next_payout: Timestamp,
}

/// What a single execution pays out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchUp {
    pub periods: u64,
    pub total: u128,
}

impl Schedule {
    pub fn derive_id(
        username: &Username,
        params: &NewSchedule,
        created_at: Timestamp,
        sequence: u64,
    ) -> PaymentId {
        PaymentId::digest(&[
            b"schedule",
            username.as_str().as_bytes(),
            params.token.as_bytes(),
            &params.amount.to_be_bytes(),
            params.interval.as_str().as_bytes(),
            &[params.is_one_time as u8],
            &params.first_payment_date.to_be_bytes(),
            &created_at.to_be_bytes(),
            &sequence.to_be_bytes(),
        ])
    }

    /// Validates the parameters and builds an active schedule whose first
    /// payout is `first_payment_date`.
    pub fn create(
        username: Username,
        params: NewSchedule,
        now: Timestamp,
        sequence: u64,
    ) -> Result<Self, PaymentError> {
        if params.amount == 0 {
            return Err(PaymentError::ZeroAmount);
        }
        if params.token.is_zero() {
            return Err(PaymentError::ZeroToken);
        }
        if params.first_payment_date <= now {
            return Err(PaymentError::InvalidFirstPaymentDate {
                first_payment_date: params.first_payment_date,
                now,
            });
        }
        let id = Self::derive_id(&username, &params, now, sequence);
        Ok(Self {
            id,
            username,
            token: params.token,
            amount: params.amount,
            interval: params.interval,
            is_one_time: params.is_one_time,
            active: true,
            first_payment_date: params.first_payment_date,
            next_payout: params.first_payment_date,
        })
    }

    pub fn ensure_active(&self) -> Result<(), PaymentError> {
        if self.active {
            Ok(())
        } else {
            Err(PaymentError::ScheduleNotActive(self.id.to_string()))
        }
    }

    /// Number of elapsed intervals to pay at `now` and the total owed.
    ///
    /// Recurring schedules pay `1 + floor((now - next_payout) / interval)`
    /// periods, capped at `max_periods`; one-time schedules pay exactly one.
    pub fn catch_up(&self, now: Timestamp, max_periods: u64) -> Result<CatchUp, PaymentError> {
        self.ensure_active()?;
        if now < self.next_payout {
            return Err(PaymentError::PaymentNotDue {
                next_payout: self.next_payout,
                now,
            });
        }
        let periods = if self.is_one_time {
            1
        } else {
            let missed = (now - self.next_payout) / self.interval.seconds();
            missed.saturating_add(1).min(max_periods.max(1))
        };
        let total = self
            .amount
            .checked_mul(u128::from(periods))
            .ok_or(PaymentError::ArithmeticOverflow("schedule payout"))?;
        Ok(CatchUp { periods, total })
    }

    /// Records a payout of `periods` intervals.
    pub fn settle(&mut self, periods: u64) -> Result<(), PaymentError> {
        if self.is_one_time {
            self.active = false;
            return Ok(());
        }
        let step = periods
            .checked_mul(self.interval.seconds())
            .ok_or(PaymentError::ArithmeticOverflow("next payout"))?;
        self.next_payout = self
            .next_payout
            .checked_add(step)
            .ok_or(PaymentError::ArithmeticOverflow("next payout"))?;
        Ok(())
    }

    pub fn set_amount(&mut self, amount: u128) -> Result<(), PaymentError> {
        self.ensure_active()?;
        if amount == 0 {
            return Err(PaymentError::ZeroAmount);
        }
        self.amount = amount;
        Ok(())
    }

    /// Switches interval and rebases the series on the next payout so the
    /// schedule stays aligned to whole intervals from `first_payment_date`.
    pub fn set_interval(&mut self, interval: Interval) -> Result<(), PaymentError> {
        self.ensure_active()?;
        self.interval = interval;
        self.first_payment_date = self.next_payout;
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), PaymentError> {
        self.ensure_active()?;
        self.active = false;
        Ok(())
    }
}
