use super::address::{Address, PaymentId};
use super::stream::FlowRate;
use serde::{Deserialize, Serialize};

/// Payload of a single delegated call.
///
/// Token calls target the token contract; every other call targets the
/// token's flow ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum Call {
    Approve {
        spender: Address,
        amount: u128,
    },
    Transfer {
        to: Address,
        amount: u128,
    },
    Deposit {
        amount: u128,
    },
    CreateStreamWithReason {
        recipient: Address,
        rate: FlowRate,
        memo: String,
    },
    ModifyStream {
        old_recipient: Address,
        old_rate: FlowRate,
        new_recipient: Address,
        new_rate: FlowRate,
    },
    CancelStream {
        recipient: Address,
        rate: FlowRate,
    },
    WithdrawRemainderToPayer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub target: Address,
    /// Native value attached to the call.
    pub value: u128,
    pub call: Call,
}

impl Instruction {
    pub fn call(target: Address, call: Call) -> Self {
        Self {
            target,
            value: 0,
            call,
        }
    }
}

/// Instructions executed all-or-nothing under one idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub key: PaymentId,
    pub instructions: Vec<Instruction>,
}

impl Batch {
    pub fn new(key: PaymentId) -> Self {
        Self {
            key,
            instructions: Vec::new(),
        }
    }

    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    pub fn extend(&mut self, instructions: impl IntoIterator<Item = Instruction>) {
        self.instructions.extend(instructions);
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}
