use crate::domain::address::{Address, Timestamp};
use crate::domain::schedule::Interval;
use crate::error::{PaymentError, Result};
use serde::Deserialize;
use std::fmt;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Claim,
    UpdateRecipient,
    TransferControl,
    CreateStream,
    UpdateFlowRate,
    PauseStream,
    ResumeStream,
    CancelStream,
    MigrateStream,
    MigrateAllStreams,
    MigrateStreamsForToken,
    CreateSchedule,
    ExecuteSchedule,
    UpdateScheduleAmount,
    UpdateScheduleInterval,
    CancelSchedule,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One row of an operations file.
///
/// `caller` and `party` are either `0x`-prefixed addresses or labels that
/// are hashed into an address. `label` names the payment a create row
/// produces and refers back to it on later rows.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Operation {
    pub time: Timestamp,
    pub caller: String,
    pub op: OperationKind,
    pub username: String,
    pub party: Option<String>,
    pub token: Option<String>,
    pub amount: Option<u128>,
    pub interval: Option<Interval>,
    pub one_time: Option<bool>,
    pub date: Option<Timestamp>,
    pub label: Option<String>,
}

impl Operation {
    pub fn caller(&self) -> Result<Address> {
        resolve_address(&self.caller)
    }

    pub fn party(&self) -> Result<Address> {
        resolve_address(self.required(self.party.as_deref(), "party")?)
    }

    pub fn token(&self) -> Result<Address> {
        resolve_address(self.required(self.token.as_deref(), "token")?)
    }

    pub fn amount(&self) -> Result<u128> {
        self.required(self.amount, "amount")
    }

    pub fn interval(&self) -> Result<Interval> {
        self.required(self.interval, "interval")
    }

    pub fn date(&self) -> Result<Timestamp> {
        self.required(self.date, "date")
    }

    pub fn label(&self) -> Result<&str> {
        self.required(self.label.as_deref(), "label")
    }

    fn required<T>(&self, value: Option<T>, column: &str) -> Result<T> {
        value.ok_or_else(|| PaymentError::Config(format!("{} requires column {column}", self.op)))
    }
}

/// `0x`-prefixed hex is parsed as-is; anything else is a label.
pub fn resolve_address(raw: &str) -> Result<Address> {
    if raw.starts_with("0x") {
        raw.parse()
    } else {
        Ok(Address::derive(raw))
    }
}

/// Reads operations from a CSV source.
///
/// This reader wraps `csv::Reader` and provides an iterator over `Result<Operation>`.
/// It handles whitespace trimming and flexible record lengths automatically.
pub struct OperationReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> OperationReader<R> {
    /// Creates a new `OperationReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and deserializes operations.
    pub fn operations(self) -> impl Iterator<Item = Result<Operation>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}
