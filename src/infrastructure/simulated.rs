//! In-process stand-ins for the collaborators the engine does not own.
//!
//! `SimulatedFlowNetwork` plays both the ledger directory and the atomic fund
//! executor. Each batch is applied to a copy of the network state and only
//! committed when every instruction succeeds.

use crate::domain::address::{Address, PaymentId, Timestamp};
use crate::domain::instruction::{Batch, Call, Instruction};
use crate::domain::ports::{
    AuthorizationService, Clock, FundExecutor, LedgerDirectory, LedgerRef, Permission,
    SignatureVerifier,
};
use crate::domain::username::Username;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn rejected(reason: impl Into<String>) -> PaymentError {
    PaymentError::DelegationFailed(reason.into())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub token: Address,
    pub to: Address,
    pub amount: u128,
}

#[derive(Debug, Clone, Default)]
struct NetworkState {
    allowances: HashMap<(Address, Address), u128>,
    deposits: HashMap<Address, u128>,
    /// Summed open rate per (ledger, recipient).
    positions: HashMap<(Address, Address), u128>,
    sweeps: HashMap<Address, usize>,
    transfers: Vec<Transfer>,
    keys: HashSet<PaymentId>,
    batches: Vec<Batch>,
}

impl NetworkState {
    fn apply(&mut self, ledger_tokens: &HashMap<Address, Address>, instruction: &Instruction) -> Result<()> {
        let target = instruction.target;
        match &instruction.call {
            Call::Approve { spender, amount } => {
                self.allowances.insert((target, *spender), *amount);
            }
            Call::Transfer { to, amount } => {
                if to.is_zero() {
                    return Err(rejected("transfer to the zero address"));
                }
                self.transfers.push(Transfer {
                    token: target,
                    to: *to,
                    amount: *amount,
                });
            }
            Call::Deposit { amount } => {
                let token = ledger_tokens
                    .get(&target)
                    .ok_or_else(|| rejected(format!("unknown ledger {target}")))?;
                let allowance = self.allowances.entry((*token, target)).or_default();
                *allowance = allowance
                    .checked_sub(*amount)
                    .ok_or_else(|| rejected("deposit exceeds allowance"))?;
                let funded = self.deposits.entry(target).or_default();
                *funded = funded
                    .checked_add(*amount)
                    .ok_or_else(|| rejected("deposit overflow"))?;
            }
            Call::CreateStreamWithReason {
                recipient, rate, ..
            } => {
                self.open(target, *recipient, rate.value())?;
            }
            Call::ModifyStream {
                old_recipient,
                old_rate,
                new_recipient,
                new_rate,
            } => {
                self.close(target, *old_recipient, old_rate.value())?;
                self.open(target, *new_recipient, new_rate.value())?;
            }
            Call::CancelStream { recipient, rate } => {
                self.close(target, *recipient, rate.value())?;
            }
            Call::WithdrawRemainderToPayer => {
                if self.positions.keys().any(|(ledger, _)| *ledger == target) {
                    return Err(rejected("ledger still has open streams"));
                }
                self.deposits.insert(target, 0);
                *self.sweeps.entry(target).or_default() += 1;
            }
        }
        Ok(())
    }

    fn open(&mut self, ledger: Address, recipient: Address, rate: u128) -> Result<()> {
        if rate == 0 {
            return Ok(());
        }
        if recipient.is_zero() {
            return Err(rejected("stream to the zero address"));
        }
        let position = self.positions.entry((ledger, recipient)).or_default();
        *position = position
            .checked_add(rate)
            .ok_or_else(|| rejected("position overflow"))?;
        Ok(())
    }

    fn close(&mut self, ledger: Address, recipient: Address, rate: u128) -> Result<()> {
        if rate == 0 {
            return Ok(());
        }
        let key = (ledger, recipient);
        let open = self.positions.get(&key).copied().unwrap_or(0);
        let remaining = open
            .checked_sub(rate)
            .ok_or_else(|| rejected(format!("no open stream of {rate}/s to {recipient}")))?;
        if remaining == 0 {
            self.positions.remove(&key);
        } else {
            self.positions.insert(key, remaining);
        }
        Ok(())
    }
}

/// Flow ledgers and fund execution for every token, held in memory.
pub struct SimulatedFlowNetwork {
    default_token_decimals: u8,
    token_decimals: Mutex<HashMap<Address, u8>>,
    ledger_tokens: Mutex<HashMap<Address, Address>>,
    resolutions: AtomicUsize,
    fail_next: Mutex<Option<String>>,
    state: Mutex<NetworkState>,
}

impl SimulatedFlowNetwork {
    pub fn new(default_token_decimals: u8) -> Self {
        Self {
            default_token_decimals,
            token_decimals: Mutex::new(HashMap::new()),
            ledger_tokens: Mutex::new(HashMap::new()),
            resolutions: AtomicUsize::new(0),
            fail_next: Mutex::new(None),
            state: Mutex::new(NetworkState::default()),
        }
    }

    /// Overrides the decimals reported for one token.
    pub fn with_token_decimals(self, token: Address, decimals: u8) -> Self {
        lock(&self.token_decimals).insert(token, decimals);
        self
    }

    pub fn ledger_of(token: &Address) -> Address {
        Address::derive(&format!("flow-ledger:{token}"))
    }

    /// Makes the next batch fail with `reason` without touching state.
    pub fn fail_next_batch(&self, reason: &str) {
        *lock(&self.fail_next) = Some(reason.to_string());
    }

    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::Relaxed)
    }

    /// Open rate from the token's ledger to `recipient`.
    pub fn position(&self, token: &Address, recipient: &Address) -> u128 {
        let state = lock(&self.state);
        state
            .positions
            .get(&(Self::ledger_of(token), *recipient))
            .copied()
            .unwrap_or(0)
    }

    pub fn open_positions(&self, token: &Address) -> usize {
        let ledger = Self::ledger_of(token);
        lock(&self.state)
            .positions
            .keys()
            .filter(|(owner, _)| *owner == ledger)
            .count()
    }

    pub fn funded(&self, token: &Address) -> u128 {
        lock(&self.state)
            .deposits
            .get(&Self::ledger_of(token))
            .copied()
            .unwrap_or(0)
    }

    pub fn sweeps(&self, token: &Address) -> usize {
        lock(&self.state)
            .sweeps
            .get(&Self::ledger_of(token))
            .copied()
            .unwrap_or(0)
    }

    pub fn transfers(&self) -> Vec<Transfer> {
        lock(&self.state).transfers.clone()
    }

    /// Every committed batch, oldest first.
    pub fn batches(&self) -> Vec<Batch> {
        lock(&self.state).batches.clone()
    }
}

#[async_trait]
impl LedgerDirectory for SimulatedFlowNetwork {
    async fn resolve(&self, token: &Address) -> Result<LedgerRef> {
        if token.is_zero() {
            return Err(PaymentError::ZeroToken);
        }
        self.resolutions.fetch_add(1, Ordering::Relaxed);
        let ledger = Self::ledger_of(token);
        lock(&self.ledger_tokens).insert(ledger, *token);
        let token_decimals = lock(&self.token_decimals)
            .get(token)
            .copied()
            .unwrap_or(self.default_token_decimals);
        Ok(LedgerRef {
            ledger,
            token_decimals,
        })
    }
}

#[async_trait]
impl FundExecutor for SimulatedFlowNetwork {
    async fn execute(&self, batch: Batch) -> Result<()> {
        if let Some(reason) = lock(&self.fail_next).take() {
            return Err(rejected(reason));
        }
        let ledger_tokens = lock(&self.ledger_tokens).clone();
        let mut state = lock(&self.state);
        if state.keys.contains(&batch.key) {
            return Err(rejected(format!("batch {} already executed", batch.key.short())));
        }

        let mut next = state.clone();
        for instruction in &batch.instructions {
            next.apply(&ledger_tokens, instruction)?;
        }
        next.keys.insert(batch.key);
        debug!(batch = %batch.key.short(), instructions = batch.len(), "batch committed");
        next.batches.push(batch);
        *state = next;
        Ok(())
    }
}

/// Grants `manage_payments` globally or per username.
#[derive(Debug, Default)]
pub struct RoleAuthorizer {
    global: Mutex<HashSet<Address>>,
    scoped: Mutex<HashMap<Username, HashSet<Address>>>,
}

impl RoleAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, principal: Address) {
        lock(&self.global).insert(principal);
    }

    pub fn grant_for(&self, principal: Address, username: Username) {
        lock(&self.scoped).entry(username).or_default().insert(principal);
    }

    pub fn revoke(&self, principal: &Address) {
        lock(&self.global).remove(principal);
        for principals in lock(&self.scoped).values_mut() {
            principals.remove(principal);
        }
    }
}

#[async_trait]
impl AuthorizationService for RoleAuthorizer {
    async fn is_permitted(
        &self,
        principal: &Address,
        permission: Permission,
        resource: &Username,
    ) -> Result<bool> {
        match permission {
            Permission::ManagePayments => {
                if lock(&self.global).contains(principal) {
                    return Ok(true);
                }
                Ok(lock(&self.scoped)
                    .get(resource)
                    .is_some_and(|principals| principals.contains(principal)))
            }
        }
    }
}

/// Verifies signatures made with per-address shared secrets.
#[derive(Debug, Default)]
pub struct KeyringVerifier {
    secrets: Mutex<HashMap<Address, Vec<u8>>>,
}

impl KeyringVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, signer: Address, secret: Vec<u8>) {
        lock(&self.secrets).insert(signer, secret);
    }

    /// `sha256(secret || digest)`.
    pub fn sign(secret: &[u8], digest: &[u8; 32]) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(secret);
        hasher.update(digest);
        hasher.finalize().to_vec()
    }
}

impl SignatureVerifier for KeyringVerifier {
    fn verify(&self, signer: &Address, digest: &[u8; 32], signature: &[u8]) -> bool {
        lock(&self.secrets)
            .get(signer)
            .is_some_and(|secret| Self::sign(secret, digest) == signature)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Wall-clock seconds since the Unix epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stream::FlowRate;

    fn key(label: &str) -> PaymentId {
        PaymentId::digest(&[label.as_bytes()])
    }

    async fn funded_network(token: Address, amount: u128) -> (SimulatedFlowNetwork, LedgerRef) {
        let network = SimulatedFlowNetwork::new(18);
        let ledger = network.resolve(&token).await.unwrap();
        let mut batch = Batch::new(key("fund"));
        batch.push(Instruction::call(
            token,
            Call::Approve {
                spender: ledger.ledger,
                amount,
            },
        ));
        batch.push(Instruction::call(ledger.ledger, Call::Deposit { amount }));
        network.execute(batch).await.unwrap();
        (network, ledger)
    }

    #[tokio::test]
    async fn test_deposit_requires_allowance() {
        let token = Address::derive("usdc");
        let (network, ledger) = funded_network(token, 500).await;
        assert_eq!(network.funded(&token), 500);

        let mut batch = Batch::new(key("overdraw"));
        batch.push(Instruction::call(ledger.ledger, Call::Deposit { amount: 1 }));
        assert!(network.execute(batch).await.is_err());
        assert_eq!(network.funded(&token), 500);
    }

    #[tokio::test]
    async fn test_failed_instruction_rolls_back_batch() {
        let token = Address::derive("usdc");
        let (network, ledger) = funded_network(token, 500).await;
        let bob = Address::derive("bob");
        let rate = FlowRate::new(7).unwrap();

        let mut batch = Batch::new(key("partial"));
        batch.push(Instruction::call(
            ledger.ledger,
            Call::CreateStreamWithReason {
                recipient: bob,
                rate,
                memo: "m".into(),
            },
        ));
        batch.push(Instruction::call(
            ledger.ledger,
            Call::CancelStream {
                recipient: Address::derive("carol"),
                rate,
            },
        ));
        assert!(network.execute(batch).await.is_err());
        assert_eq!(network.position(&token, &bob), 0);
        assert_eq!(network.batches().len(), 1);
    }

    #[tokio::test]
    async fn test_replayed_key_is_rejected() {
        let token = Address::derive("usdc");
        let (network, _) = funded_network(token, 10).await;
        let replay = Batch::new(key("fund"));
        let err = network.execute(replay).await.unwrap_err();
        assert!(matches!(err, PaymentError::DelegationFailed(msg) if msg.contains("already executed")));
    }

    #[tokio::test]
    async fn test_sweep_requires_no_open_streams() {
        let token = Address::derive("usdc");
        let (network, ledger) = funded_network(token, 10).await;
        let bob = Address::derive("bob");
        let rate = FlowRate::new(3).unwrap();

        let mut open = Batch::new(key("open"));
        open.push(Instruction::call(
            ledger.ledger,
            Call::CreateStreamWithReason {
                recipient: bob,
                rate,
                memo: String::new(),
            },
        ));
        network.execute(open).await.unwrap();

        let mut sweep = Batch::new(key("sweep"));
        sweep.push(Instruction::call(ledger.ledger, Call::WithdrawRemainderToPayer));
        assert!(network.execute(sweep).await.is_err());

        let mut close = Batch::new(key("close"));
        close.push(Instruction::call(
            ledger.ledger,
            Call::CancelStream {
                recipient: bob,
                rate,
            },
        ));
        close.push(Instruction::call(ledger.ledger, Call::WithdrawRemainderToPayer));
        network.execute(close).await.unwrap();
        assert_eq!(network.funded(&token), 0);
        assert_eq!(network.sweeps(&token), 1);
    }

    #[tokio::test]
    async fn test_role_authorizer_scopes() {
        let authorizer = RoleAuthorizer::new();
        let admin = Address::derive("admin");
        let helper = Address::derive("helper");
        let alice = Username::parse("alice").unwrap();
        let bob = Username::parse("bob").unwrap();
        authorizer.grant(admin);
        authorizer.grant_for(helper, alice.clone());

        let permission = Permission::ManagePayments;
        assert!(authorizer.is_permitted(&admin, permission, &bob).await.unwrap());
        assert!(authorizer.is_permitted(&helper, permission, &alice).await.unwrap());
        assert!(!authorizer.is_permitted(&helper, permission, &bob).await.unwrap());

        authorizer.revoke(&helper);
        assert!(!authorizer.is_permitted(&helper, permission, &alice).await.unwrap());
    }

    #[test]
    fn test_keyring_verifies_registered_secret() {
        let keyring = KeyringVerifier::new();
        let signer = Address::derive("signer");
        keyring.register(signer, b"secret".to_vec());
        let digest = [7u8; 32];

        let good = KeyringVerifier::sign(b"secret", &digest);
        let bad = KeyringVerifier::sign(b"other", &digest);
        assert!(keyring.verify(&signer, &digest, &good));
        assert!(!keyring.verify(&signer, &digest, &bad));
        assert!(!keyring.verify(&Address::derive("stranger"), &digest, &good));
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(5);
        clock.advance(10);
        assert_eq!(clock.now(), 15);
        clock.set(3);
        assert_eq!(clock.now(), 3);

        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now() > 1_577_836_800);
    }
}
