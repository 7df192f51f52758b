use crate::domain::address::Timestamp;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

/// One payment in the final book, stream or schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentRow {
    pub username: String,
    pub label: String,
    pub kind: &'static str,
    pub id: String,
    pub token: String,
    pub state: &'static str,
    /// Flow rate for streams, per-period amount for schedules.
    pub amount: u128,
    pub interval: Option<&'static str>,
    /// Pinned recipient for streams, current recipient for schedules.
    pub recipient: String,
    pub next_payout: Option<Timestamp>,
}

/// Writes the payment book as CSV with a header row.
pub struct PaymentWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> PaymentWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_rows(&mut self, rows: impl IntoIterator<Item = PaymentRow>) -> Result<()> {
        for row in rows {
            self.writer.serialize(row)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_header_and_optional_columns() {
        let mut buffer = Vec::new();
        {
            let mut writer = PaymentWriter::new(&mut buffer);
            writer
                .write_rows(vec![
                    PaymentRow {
                        username: "alice".into(),
                        label: "s1".into(),
                        kind: "stream",
                        id: "0xab".into(),
                        token: "0x01".into(),
                        state: "active",
                        amount: 1000,
                        interval: None,
                        recipient: "0x02".into(),
                        next_payout: None,
                    },
                    PaymentRow {
                        username: "alice".into(),
                        label: "rent".into(),
                        kind: "schedule",
                        id: "0xcd".into(),
                        token: "0x01".into(),
                        state: "active",
                        amount: 100,
                        interval: Some("weekly"),
                        recipient: "0x02".into(),
                        next_payout: Some(777),
                    },
                ])
                .unwrap();
        }
        let output = String::from_utf8(buffer).unwrap();
        let mut lines = output.lines();
        assert_eq!(
            lines.next(),
            Some("username,label,kind,id,token,state,amount,interval,recipient,next_payout")
        );
        assert_eq!(lines.next(), Some("alice,s1,stream,0xab,0x01,active,1000,,0x02,"));
        assert_eq!(
            lines.next(),
            Some("alice,rent,schedule,0xcd,0x01,active,100,weekly,0x02,777")
        );
    }
}
