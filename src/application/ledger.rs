use crate::domain::address::{Address, PaymentId, Timestamp};
use crate::domain::instruction::{Batch, Call, Instruction};
use crate::domain::ports::{FundExecutorRef, LedgerDirectoryRef, LedgerRef};
use crate::domain::stream::FlowRate;
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Largest mantissa a `Decimal` can carry (2^96 - 1).
const MAX_DECIMAL_MANTISSA: u128 = 79_228_162_514_264_337_593_543_950_335;

/// Translates flow rates and funding horizons into flow ledger calls.
///
/// Ledger references are resolved once per token and memoized. The
/// instruction builders are pure; nothing reaches the ledger until a batch
/// is handed to [`FlowLedgerAdapter::submit`].
pub struct FlowLedgerAdapter {
    directory: LedgerDirectoryRef,
    executor: FundExecutorRef,
    ledgers: RwLock<HashMap<Address, LedgerRef>>,
    ledger_decimals: u8,
    funding_horizon_secs: u64,
}

impl FlowLedgerAdapter {
    pub fn new(
        directory: LedgerDirectoryRef,
        executor: FundExecutorRef,
        ledger_decimals: u8,
        funding_horizon_secs: u64,
    ) -> Self {
        Self {
            directory,
            executor,
            ledgers: RwLock::new(HashMap::new()),
            ledger_decimals,
            funding_horizon_secs,
        }
    }

    pub async fn ensure_ledger_for(&self, token: &Address) -> Result<LedgerRef> {
        if token.is_zero() {
            return Err(PaymentError::ZeroToken);
        }
        if let Some(ledger) = self.ledgers.read().await.get(token) {
            debug!(%token, "ledger cache hit");
            return Ok(*ledger);
        }
        let ledger = self.directory.resolve(token).await?;
        self.ledgers.write().await.insert(*token, ledger);
        Ok(ledger)
    }

    /// Native token amount needed to run `rate` for `horizon_secs`.
    pub async fn estimate_funding(
        &self,
        rate: FlowRate,
        token: &Address,
        horizon_secs: u64,
    ) -> Result<u128> {
        let ledger = self.ensure_ledger_for(token).await?;
        funding_amount(rate, horizon_secs, self.ledger_decimals, ledger.token_decimals)
    }

    /// Funding estimate over the configured default horizon.
    pub async fn estimate_default_funding(&self, rate: FlowRate, token: &Address) -> Result<u128> {
        self.estimate_funding(rate, token, self.funding_horizon_secs)
            .await
    }

    /// Rate expressed in whole tokens per second.
    ///
    /// Rates wider than a `Decimal` mantissa drop their lowest fractional
    /// digits. `None` only when the integer part alone does not fit.
    pub fn rate_in_tokens(&self, rate: FlowRate) -> Option<Decimal> {
        let mut mantissa = rate.value();
        let mut scale = u32::from(self.ledger_decimals);
        while mantissa > MAX_DECIMAL_MANTISSA && scale > 0 {
            mantissa /= 10;
            scale -= 1;
        }
        let mantissa = i128::try_from(mantissa).ok()?;
        Decimal::try_from_i128_with_scale(mantissa, scale).ok()
    }

    /// Approve the ledger to pull `amount` of `token`, then deposit it.
    pub fn fund(&self, token: &Address, ledger: &LedgerRef, amount: u128) -> [Instruction; 2] {
        [
            Instruction::call(
                *token,
                Call::Approve {
                    spender: ledger.ledger,
                    amount,
                },
            ),
            Instruction::call(ledger.ledger, Call::Deposit { amount }),
        ]
    }

    pub fn open(
        &self,
        ledger: &LedgerRef,
        recipient: Address,
        rate: FlowRate,
        memo: String,
    ) -> Instruction {
        Instruction::call(
            ledger.ledger,
            Call::CreateStreamWithReason {
                recipient,
                rate,
                memo,
            },
        )
    }

    pub fn retarget(
        &self,
        ledger: &LedgerRef,
        old_recipient: Address,
        old_rate: FlowRate,
        new_recipient: Address,
        new_rate: FlowRate,
    ) -> Instruction {
        Instruction::call(
            ledger.ledger,
            Call::ModifyStream {
                old_recipient,
                old_rate,
                new_recipient,
                new_rate,
            },
        )
    }

    pub fn close(&self, ledger: &LedgerRef, recipient: Address, rate: FlowRate) -> Instruction {
        Instruction::call(ledger.ledger, Call::CancelStream { recipient, rate })
    }

    pub fn sweep_remainder(&self, ledger: &LedgerRef) -> Instruction {
        Instruction::call(ledger.ledger, Call::WithdrawRemainderToPayer)
    }

    /// Hands the batch to the fund executor. Any failure surfaces as
    /// [`PaymentError::DelegationFailed`].
    pub async fn submit(&self, batch: Batch) -> Result<()> {
        execute(&self.executor, batch).await
    }
}

/// Shared by every component that delegates fund movement.
pub(crate) async fn execute(executor: &FundExecutorRef, batch: Batch) -> Result<()> {
    let key = batch.key.short();
    let size = batch.len();
    executor.execute(batch).await.map_err(|err| {
        warn!(batch = %key, instructions = size, error = %err, "delegated batch failed");
        match err {
            PaymentError::DelegationFailed(_) => err,
            other => PaymentError::DelegationFailed(other.to_string()),
        }
    })
}

/// Issues idempotency keys for instruction batches.
#[derive(Debug, Default)]
pub struct BatchKeys {
    issued: AtomicU64,
}

impl BatchKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, operation: &str, subject: &PaymentId, now: Timestamp) -> PaymentId {
        let sequence = self.issued.fetch_add(1, Ordering::Relaxed);
        PaymentId::digest(&[
            operation.as_bytes(),
            subject.as_bytes(),
            &now.to_be_bytes(),
            &sequence.to_be_bytes(),
        ])
    }
}

/// `rate * horizon` converted from ledger precision to token precision,
/// rounded up so a stream is never funded short.
pub fn funding_amount(
    rate: FlowRate,
    horizon_secs: u64,
    ledger_decimals: u8,
    token_decimals: u8,
) -> Result<u128> {
    let overflow = || PaymentError::ArithmeticOverflow("funding estimate");
    let ledger_units = rate
        .value()
        .checked_mul(u128::from(horizon_secs))
        .ok_or_else(overflow)?;
    if ledger_decimals >= token_decimals {
        let divisor = 10u128
            .checked_pow(u32::from(ledger_decimals - token_decimals))
            .ok_or_else(overflow)?;
        Ok(ledger_units.div_ceil(divisor))
    } else {
        let factor = 10u128
            .checked_pow(u32::from(token_decimals - ledger_decimals))
            .ok_or_else(overflow)?;
        ledger_units.checked_mul(factor).ok_or_else(overflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::schedule::DAY;
    use crate::infrastructure::simulated::SimulatedFlowNetwork;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn adapter(network: Arc<SimulatedFlowNetwork>) -> FlowLedgerAdapter {
        FlowLedgerAdapter::new(network.clone(), network, 20, 180 * DAY)
    }

    #[test]
    fn test_funding_amount_scales_down_and_rounds_up() {
        let rate = FlowRate::new(1).unwrap();
        // 1e-20 tokens/s for 10s at 18 decimals is a fraction of a unit.
        assert_eq!(funding_amount(rate, 10, 20, 18).unwrap(), 1);

        let rate = FlowRate::new(100).unwrap();
        assert_eq!(funding_amount(rate, 1, 20, 18).unwrap(), 1);
        assert_eq!(funding_amount(rate, 3, 20, 18).unwrap(), 3);

        let rate = FlowRate::new(10u128.pow(20)).unwrap();
        assert_eq!(funding_amount(rate, DAY, 20, 6).unwrap(), 86_400_000_000);
    }

    #[test]
    fn test_funding_amount_scales_up_for_wide_tokens() {
        let rate = FlowRate::new(5).unwrap();
        assert_eq!(funding_amount(rate, 2, 20, 24).unwrap(), 100_000);
    }

    #[test]
    fn test_funding_amount_overflow() {
        let rate = FlowRate::new(u128::MAX).unwrap();
        assert!(matches!(
            funding_amount(rate, 2, 20, 18),
            Err(PaymentError::ArithmeticOverflow(_))
        ));
    }

    #[tokio::test]
    async fn test_ledger_resolution_is_memoized() {
        let network = Arc::new(SimulatedFlowNetwork::new(18));
        let adapter = adapter(network.clone());
        let token = Address::derive("usdc");

        let first = adapter.ensure_ledger_for(&token).await.unwrap();
        let second = adapter.ensure_ledger_for(&token).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(network.resolutions(), 1);

        assert!(matches!(
            adapter.ensure_ledger_for(&Address::ZERO).await,
            Err(PaymentError::ZeroToken)
        ));
    }

    #[tokio::test]
    async fn test_default_horizon_estimate() {
        let network = Arc::new(SimulatedFlowNetwork::new(18));
        let adapter = adapter(network);
        let token = Address::derive("usdc");
        let rate = FlowRate::new(1000).unwrap();

        // 1000 * 180 days in 20-decimal units, scaled to 18 decimals.
        let expected = (1000u128 * 180 * 86_400).div_ceil(100);
        assert_eq!(
            adapter.estimate_default_funding(rate, &token).await.unwrap(),
            expected
        );
    }

    #[tokio::test]
    async fn test_estimate_uses_token_decimals() {
        let token = Address::derive("usdc");
        let network = Arc::new(SimulatedFlowNetwork::new(18).with_token_decimals(token, 6));
        let adapter = adapter(network);
        let rate = FlowRate::new(10u128.pow(20)).unwrap();

        // One whole token per second for a day, in 6-decimal units.
        assert_eq!(
            adapter.estimate_funding(rate, &token, DAY).await.unwrap(),
            86_400_000_000
        );
    }

    #[test]
    fn test_rate_in_tokens() {
        let network = Arc::new(SimulatedFlowNetwork::new(18));
        let adapter = adapter(network);
        let rate = FlowRate::new(150_000_000_000_000_000_000).unwrap();
        assert_eq!(adapter.rate_in_tokens(rate), Some(dec!(1.5)));
    }

    #[test]
    fn test_rate_in_tokens_past_decimal_precision() {
        let network = Arc::new(SimulatedFlowNetwork::new(18));
        let wide = adapter(network.clone());
        let rate = FlowRate::new(10u128.pow(29) + 7).unwrap();
        assert_eq!(wide.rate_in_tokens(rate), Some(dec!(1_000_000_000)));
        assert!(wide.rate_in_tokens(FlowRate::new(u128::MAX).unwrap()).is_some());

        let whole_units = FlowLedgerAdapter::new(network.clone(), network, 0, DAY);
        assert_eq!(whole_units.rate_in_tokens(FlowRate::new(u128::MAX).unwrap()), None);
    }

    #[tokio::test]
    async fn test_submit_wraps_executor_failures() {
        let network = Arc::new(SimulatedFlowNetwork::new(18));
        let adapter = adapter(network.clone());
        network.fail_next_batch("ledger offline");

        let batch = Batch::new(crate::domain::address::PaymentId::digest(&[b"k"]));
        let err = adapter.submit(batch).await.unwrap_err();
        assert!(matches!(err, PaymentError::DelegationFailed(msg) if msg.contains("ledger offline")));
    }
}
