//! Signer-bound clients for the access-control and election-management
//! contracts.
use crate::{
    address::Address,
    election::{
        ElectionDraft,
        ElectionId,
        ElectionRecord,
        ElectionResult,
    },
    error::{
        Error,
        Result,
    },
    wallet::Provider,
};
use async_std::sync::RwLock;
use async_trait::async_trait;
use core::fmt;
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ContractKind {
    AccessControl,
    ElectionManagement,
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ContractKind::AccessControl => write!(f, "access-control"),
            ContractKind::ElectionManagement => {
                write!(f, "election-management")
            }
        }
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TxHash(pub String);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Proof that a transaction was mined.
#[derive(new, Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Receipt {
    pub tx: TxHash,
    pub block: u64,
}

#[async_trait]
pub trait AccessControl: Send + Sync {
    async fn is_admin(&self, who: &Address) -> Result<bool>;
    async fn add_admin(&self, who: &Address) -> Result<TxHash>;
    async fn remove_admin(&self, who: &Address) -> Result<TxHash>;
}

#[async_trait]
pub trait ElectionManager: Send + Sync {
    async fn election_count(&self) -> Result<u64>;
    async fn get_election(&self, id: ElectionId) -> Result<ElectionRecord>;
    async fn has_voted(&self, id: ElectionId, who: &Address) -> Result<bool>;
    async fn votes(&self, id: ElectionId, candidate: u32) -> Result<u64>;
    async fn create_election(&self, draft: &ElectionDraft) -> Result<TxHash>;
    async fn vote(&self, id: ElectionId, candidate: u32) -> Result<TxHash>;
    async fn compute_winner(&self, id: ElectionId) -> Result<String>;
    async fn get_election_results(
        &self,
        id: ElectionId,
    ) -> Result<ElectionResult>;
    async fn results_published(&self, id: ElectionId) -> Result<bool>;
    async fn publish_results(&self, id: ElectionId) -> Result<TxHash>;
    async fn published_results(&self, id: ElectionId)
        -> Result<ElectionResult>;
}

/// Contract binding library layered over the wallet provider.
#[async_trait]
pub trait Bindings: Provider + 'static {
    /// Account that signs transactions.
    async fn signer(&self) -> Result<Address>;
    fn access_control(
        &self,
        at: &Address,
        signer: &Address,
    ) -> Arc<dyn AccessControl>;
    fn election_manager(
        &self,
        at: &Address,
        signer: &Address,
    ) -> Arc<dyn ElectionManager>;
    /// Resolves once the transaction is mined.
    async fn wait_for_receipt(&self, tx: &TxHash) -> Result<Receipt>;
}

struct Bound<C: ?Sized> {
    address: Address,
    signer: Address,
    contract: Arc<C>,
}

pub struct Gateway<B> {
    backend: Option<Arc<B>>,
    access_control: RwLock<Option<Bound<dyn AccessControl>>>,
    election_manager: RwLock<Option<Bound<dyn ElectionManager>>>,
}

impl<B: Bindings> Gateway<B> {
    pub fn new(backend: Option<Arc<B>>) -> Self {
        Self {
            backend,
            access_control: RwLock::new(None),
            election_manager: RwLock::new(None),
        }
    }

    pub fn backend(&self) -> Option<&Arc<B>> {
        self.backend.as_ref()
    }

    fn require_backend(&self) -> Result<&Arc<B>> {
        self.backend.as_ref().ok_or(Error::WalletUnavailable)
    }

    /// Binds `kind` at `address` to the current signer, replacing any
    /// previous binding.
    pub async fn init_contract(
        &self,
        kind: ContractKind,
        address: &Address,
    ) -> Result<()> {
        let backend = self.require_backend()?;
        let signer = backend.signer().await?;
        match kind {
            ContractKind::AccessControl => {
                let contract = backend.access_control(address, &signer);
                *self.access_control.write().await = Some(Bound {
                    address: address.clone(),
                    signer: signer.clone(),
                    contract,
                });
            }
            ContractKind::ElectionManagement => {
                let contract = backend.election_manager(address, &signer);
                *self.election_manager.write().await = Some(Bound {
                    address: address.clone(),
                    signer: signer.clone(),
                    contract,
                });
            }
        }
        log::info!("bound {} contract at {} for {}", kind, address, signer);
        Ok(())
    }

    /// Drops both bindings.
    pub async fn reset(&self) {
        *self.access_control.write().await = None;
        *self.election_manager.write().await = None;
    }

    /// Address and signer of the current binding.
    pub async fn binding(&self, kind: ContractKind) -> Option<(Address, Address)> {
        match kind {
            ContractKind::AccessControl => self
                .access_control
                .read()
                .await
                .as_ref()
                .map(|b| (b.address.clone(), b.signer.clone())),
            ContractKind::ElectionManagement => self
                .election_manager
                .read()
                .await
                .as_ref()
                .map(|b| (b.address.clone(), b.signer.clone())),
        }
    }

    async fn auth(&self) -> Result<Arc<dyn AccessControl>> {
        self.access_control
            .read()
            .await
            .as_ref()
            .map(|b| b.contract.clone())
            .ok_or(Error::NotInitialized(ContractKind::AccessControl))
    }

    async fn manager(&self) -> Result<Arc<dyn ElectionManager>> {
        self.election_manager
            .read()
            .await
            .as_ref()
            .map(|b| b.contract.clone())
            .ok_or(Error::NotInitialized(ContractKind::ElectionManagement))
    }

    async fn confirm(&self, tx: TxHash) -> Result<Receipt> {
        let receipt = self.require_backend()?.wait_for_receipt(&tx).await?;
        log::debug!("{} confirmed in block {}", receipt.tx, receipt.block);
        Ok(receipt)
    }

    pub async fn is_admin(&self, who: &Address) -> Result<bool> {
        self.auth().await?.is_admin(who).await
    }

    pub async fn add_admin(&self, who: &Address) -> Result<Receipt> {
        let tx = self.auth().await?.add_admin(who).await?;
        self.confirm(tx).await
    }

    pub async fn remove_admin(&self, who: &Address) -> Result<Receipt> {
        let tx = self.auth().await?.remove_admin(who).await?;
        self.confirm(tx).await
    }

    pub async fn election_count(&self) -> Result<u64> {
        self.manager().await?.election_count().await
    }

    pub async fn get_election(&self, id: ElectionId) -> Result<ElectionRecord> {
        self.manager().await?.get_election(id).await
    }

    pub async fn has_voted(&self, id: ElectionId, who: &Address) -> Result<bool> {
        self.manager().await?.has_voted(id, who).await
    }

    pub async fn votes(&self, id: ElectionId, candidate: u32) -> Result<u64> {
        self.manager().await?.votes(id, candidate).await
    }

    pub async fn create_election(&self, draft: &ElectionDraft) -> Result<Receipt> {
        let tx = self.manager().await?.create_election(draft).await?;
        self.confirm(tx).await
    }

    pub async fn vote(&self, id: ElectionId, candidate: u32) -> Result<Receipt> {
        let tx = self.manager().await?.vote(id, candidate).await?;
        self.confirm(tx).await
    }

    pub async fn compute_winner(&self, id: ElectionId) -> Result<String> {
        self.manager().await?.compute_winner(id).await
    }

    pub async fn get_election_results(
        &self,
        id: ElectionId,
    ) -> Result<ElectionResult> {
        self.manager().await?.get_election_results(id).await
    }

    pub async fn results_published(&self, id: ElectionId) -> Result<bool> {
        self.manager().await?.results_published(id).await
    }

    pub async fn publish_results(&self, id: ElectionId) -> Result<Receipt> {
        let tx = self.manager().await?.publish_results(id).await?;
        self.confirm(tx).await
    }

    pub async fn published_results(
        &self,
        id: ElectionId,
    ) -> Result<ElectionResult> {
        self.manager().await?.published_results(id).await
    }
}
