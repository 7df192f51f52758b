use crate::config::RegistryDomain;
use crate::domain::address::{Address, Timestamp};
use crate::domain::ports::{ClockRef, RegistryStoreRef, SignatureVerifierRef};
use crate::domain::username::{Username, UsernameRecord};
use crate::error::{PaymentError, Result};
use sha2::{Digest, Sha256};
use tracing::info;

const CLAIM_TYPE: &[u8] =
    b"ClaimUsername(string username,address recipient,address controller,uint256 nonce,uint256 deadline)";

/// Maps usernames to their controller and recipient.
///
/// Claims are first-come and permanent. Only the current controller can
/// repoint the recipient or hand control to someone else.
pub struct IdentityRegistry {
    store: RegistryStoreRef,
    verifier: SignatureVerifierRef,
    clock: ClockRef,
    domain_separator: [u8; 32],
}

impl IdentityRegistry {
    pub fn new(
        store: RegistryStoreRef,
        verifier: SignatureVerifierRef,
        clock: ClockRef,
        domain: &RegistryDomain,
    ) -> Self {
        Self {
            store,
            verifier,
            clock,
            domain_separator: domain_separator(domain),
        }
    }

    /// Claims `username` with the caller as controller.
    pub async fn claim(
        &self,
        caller: &Address,
        username: &Username,
        recipient: Address,
    ) -> Result<()> {
        self.claim_for(caller, username, recipient, *caller).await
    }

    /// Claims `username` for an explicit controller. The caller must be that
    /// controller, so nobody can register a name on someone else's behalf.
    pub async fn claim_for(
        &self,
        caller: &Address,
        username: &Username,
        recipient: Address,
        controller: Address,
    ) -> Result<()> {
        if *caller != controller {
            return Err(PaymentError::NotController(username.to_string()));
        }
        let record = UsernameRecord::new(controller, recipient, self.clock.now())?;
        self.ensure_available(username).await?;
        self.store.store(username, record).await?;
        info!(%username, %controller, %recipient, "username claimed");
        Ok(())
    }

    /// Claims `username` on behalf of `controller` using their signature over
    /// the claim digest. Anyone may relay it.
    pub async fn claim_with_authorization(
        &self,
        username: &Username,
        recipient: Address,
        controller: Address,
        deadline: Timestamp,
        signature: &[u8],
    ) -> Result<()> {
        let now = self.clock.now();
        if now > deadline {
            return Err(PaymentError::ExpiredAuthorization { deadline, now });
        }
        let record = UsernameRecord::new(controller, recipient, now)?;
        self.ensure_available(username).await?;

        let nonce = self.store.nonce(&controller).await?;
        let digest = self.claim_digest(username, &recipient, &controller, nonce, deadline);
        if !self.verifier.verify(&controller, &digest, signature) {
            return Err(PaymentError::InvalidAuthorization);
        }

        self.store.store_nonce(&controller, nonce + 1).await?;
        self.store.store(username, record).await?;
        info!(%username, %controller, %recipient, nonce, "username claimed with authorization");
        Ok(())
    }

    pub async fn update_recipient(
        &self,
        caller: &Address,
        username: &Username,
        new_recipient: Address,
    ) -> Result<()> {
        let mut record = self.controlled_record(caller, username).await?;
        record.set_recipient(new_recipient, self.clock.now())?;
        self.store.store(username, record).await?;
        info!(%username, recipient = %new_recipient, "recipient updated");
        Ok(())
    }

    pub async fn transfer_control(
        &self,
        caller: &Address,
        username: &Username,
        new_controller: Address,
    ) -> Result<()> {
        let mut record = self.controlled_record(caller, username).await?;
        record.set_controller(new_controller, self.clock.now())?;
        self.store.store(username, record).await?;
        info!(%username, controller = %new_controller, "control transferred");
        Ok(())
    }

    pub async fn record(&self, username: &Username) -> Result<UsernameRecord> {
        self.store
            .get(username)
            .await?
            .ok_or_else(|| PaymentError::UsernameNotFound(username.to_string()))
    }

    pub async fn controller(&self, username: &Username) -> Result<Address> {
        Ok(self.record(username).await?.controller)
    }

    pub async fn recipient(&self, username: &Username) -> Result<Address> {
        Ok(self.record(username).await?.recipient)
    }

    pub async fn last_update(&self, username: &Username) -> Result<Timestamp> {
        Ok(self.record(username).await?.last_update_time)
    }

    pub async fn is_available(&self, username: &Username) -> Result<bool> {
        Ok(self.store.get(username).await?.is_none())
    }

    pub async fn nonce_of(&self, controller: &Address) -> Result<u64> {
        self.store.nonce(controller).await
    }

    /// Fails unless `caller` controls `username`.
    pub async fn ensure_controller(&self, caller: &Address, username: &Username) -> Result<()> {
        self.controlled_record(caller, username).await.map(|_| ())
    }

    /// The digest a controller signs to authorize a delegated claim.
    pub fn claim_digest(
        &self,
        username: &Username,
        recipient: &Address,
        controller: &Address,
        nonce: u64,
        deadline: Timestamp,
    ) -> [u8; 32] {
        let mut struct_hasher = Sha256::new();
        struct_hasher.update(Sha256::digest(CLAIM_TYPE));
        struct_hasher.update(Sha256::digest(username.as_str().as_bytes()));
        struct_hasher.update(recipient.as_bytes());
        struct_hasher.update(controller.as_bytes());
        struct_hasher.update(nonce.to_be_bytes());
        struct_hasher.update(deadline.to_be_bytes());
        let struct_hash = struct_hasher.finalize();

        let mut hasher = Sha256::new();
        hasher.update(b"\x19\x01");
        hasher.update(self.domain_separator);
        hasher.update(struct_hash);
        hasher.finalize().into()
    }

    async fn ensure_available(&self, username: &Username) -> Result<()> {
        if self.store.get(username).await?.is_some() {
            return Err(PaymentError::AlreadyClaimed(username.to_string()));
        }
        Ok(())
    }

    async fn controlled_record(
        &self,
        caller: &Address,
        username: &Username,
    ) -> Result<UsernameRecord> {
        let record = self.record(username).await?;
        if record.controller != *caller {
            return Err(PaymentError::NotController(username.to_string()));
        }
        Ok(record)
    }
}

fn domain_separator(domain: &RegistryDomain) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(Sha256::digest(
        b"Domain(string name,string version,uint256 chainId,address verifyingContract)",
    ));
    hasher.update(Sha256::digest(domain.name.as_bytes()));
    hasher.update(Sha256::digest(domain.version.as_bytes()));
    hasher.update(domain.chain_id.to_be_bytes());
    hasher.update(domain.verifying_contract.as_bytes());
    hasher.finalize().into()
}
