//! In-memory wallet and contracts for tests and local demos.
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
    gateway::{
        AccessControl,
        Bindings,
        ElectionManager,
        Receipt,
        TxHash,
    },
    wallet::{
        Listener,
        ListenerId,
        Provider,
        WalletEvent,
    },
};
use async_trait::async_trait;
use std::{
    collections::{
        HashMap,
        HashSet,
    },
    sync::{
        atomic::{
            AtomicU64,
            Ordering,
        },
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
};

pub const DEV_CHAIN_ID: &str = "0x7a69";
pub const ACCESS_CONTROL_ADDRESS: &str =
    "0x5fbdb2315678afecb367f032d93f642f64180aa3";
pub const ELECTION_MANAGER_ADDRESS: &str =
    "0xe7f1725e7734ce288f8367e1bb143e90bb3f0512";

// hardhat's first three dev accounts
pub const ALICE: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
pub const BOB: &str = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8";
pub const CAROL: &str = "0x3c44cdddb6a900fa2b585dd299e03d12fa4293bc";

const GENESIS_TIME: u64 = 1_700_000_000;

struct Ballot {
    record: ElectionRecord,
    votes: Vec<u64>,
    voters: HashSet<Address>,
    published: Option<ElectionResult>,
}

impl Ballot {
    fn tally(&self) -> ElectionResult {
        ElectionResult::tally(self.record.candidates.clone(), self.votes.clone())
    }
}

struct ChainState {
    chain_id: String,
    selected: String,
    approved: bool,
    reject_prompts: bool,
    failing_reads: bool,
    prompts: usize,
    now: u64,
    block: u64,
    receipts: HashMap<TxHash, u64>,
    admins: HashSet<Address>,
    ballots: Vec<Ballot>,
}

impl ChainState {
    fn mine(&mut self) -> TxHash {
        self.block += 1;
        let tx = TxHash(format!("0x{:064x}", self.block));
        self.receipts.insert(tx.clone(), self.block);
        tx
    }

    fn readable(&self) -> Result<()> {
        if self.failing_reads {
            Err(Error::ContractCallFailed(
                "network error: request timed out".into(),
            ))
        } else {
            Ok(())
        }
    }

    fn require_admin(&self, who: &Address, reason: &str) -> Result<()> {
        if self.admins.contains(who) {
            Ok(())
        } else {
            Err(Error::from_revert(reason))
        }
    }

    fn ballot(&self, id: ElectionId) -> Result<&Ballot> {
        id.checked_sub(1)
            .and_then(|i| self.ballots.get(i as usize))
            .ok_or_else(|| Error::from_revert("Election does not exist"))
    }

    fn ballot_mut(&mut self, id: ElectionId) -> Result<&mut Ballot> {
        match id.checked_sub(1) {
            Some(i) if (i as usize) < self.ballots.len() => {
                Ok(&mut self.ballots[i as usize])
            }
            _ => Err(Error::from_revert("Election does not exist")),
        }
    }
}

type SharedListener = Arc<dyn Fn(&WalletEvent) + Send + Sync>;

struct Shared {
    state: Mutex<ChainState>,
    listeners: Mutex<Vec<(ListenerId, SharedListener)>>,
    next_listener: AtomicU64,
}

/// A local chain with the access-control and election-management
/// contracts deployed, plus the wallet extension in front of it.
#[derive(Clone)]
pub struct DevChain {
    shared: Arc<Shared>,
}

impl DevChain {
    /// Deploys both contracts with `deployer` as the first admin. The
    /// wallet starts on `deployer` without having approved the site.
    pub fn new(deployer: &str) -> Self {
        let mut admins = HashSet::new();
        if let Ok(address) = deployer.parse() {
            admins.insert(address);
        }
        let state = ChainState {
            chain_id: DEV_CHAIN_ID.to_string(),
            selected: deployer.to_lowercase(),
            approved: false,
            reject_prompts: false,
            failing_reads: false,
            prompts: 0,
            now: GENESIS_TIME,
            block: 0,
            receipts: HashMap::new(),
            admins,
            ballots: Vec::new(),
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
            }),
        }
    }

    fn state(&self) -> MutexGuard<ChainState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> MutexGuard<Vec<(ListenerId, SharedListener)>> {
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: WalletEvent) {
        let listeners: Vec<SharedListener> =
            self.listeners().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener(&event);
        }
    }

    /// Approves the site without a prompt, as if done in an earlier visit.
    pub fn approve(&self) {
        self.state().approved = true;
    }

    pub fn reject_prompts(&self, reject: bool) {
        self.state().reject_prompts = reject;
    }

    pub fn prompt_count(&self) -> usize {
        self.state().prompts
    }

    /// Makes every contract read fail until switched off again.
    pub fn fail_reads(&self, fail: bool) {
        self.state().failing_reads = fail;
    }

    pub fn selected(&self) -> String {
        self.state().selected.clone()
    }

    /// Switches the wallet's active account.
    pub fn select_account(&self, account: &str) {
        let approved = {
            let mut state = self.state();
            state.selected = account.to_lowercase();
            state.approved
        };
        if approved {
            self.emit(WalletEvent::AccountsChanged(vec![account.to_string()]));
        }
    }

    pub fn disconnect(&self) {
        self.state().approved = false;
        self.emit(WalletEvent::AccountsChanged(Vec::new()));
    }

    pub fn switch_chain(&self, chain_id: &str) {
        self.state().chain_id = chain_id.to_string();
        self.emit(WalletEvent::ChainChanged(chain_id.to_string()));
    }

    pub fn now(&self) -> u64 {
        self.state().now
    }

    pub fn set_time(&self, now: u64) {
        self.state().now = now;
    }

    pub fn advance(&self, seconds: u64) {
        self.state().now += seconds;
    }

    /// Grants admin rights outside of any session, as another admin would.
    pub fn grant_admin(&self, account: &str) {
        if let Ok(address) = account.parse() {
            self.state().admins.insert(address);
        }
    }

    /// Revokes admin rights outside of any session.
    pub fn revoke_admin(&self, account: &str) {
        if let Ok(address) = account.parse::<Address>() {
            self.state().admins.remove(&address);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners().len()
    }
}

#[async_trait]
impl Provider for DevChain {
    async fn request_accounts(&self) -> Result<Vec<String>> {
        let mut state = self.state();
        state.prompts += 1;
        if state.reject_prompts {
            return Err(Error::UserRejected)
        }
        state.approved = true;
        Ok(vec![state.selected.clone()])
    }

    async fn accounts(&self) -> Result<Vec<String>> {
        let state = self.state();
        if state.approved {
            Ok(vec![state.selected.clone()])
        } else {
            Ok(Vec::new())
        }
    }

    async fn chain_id(&self) -> Result<String> {
        Ok(self.state().chain_id.clone())
    }

    fn add_listener(&self, listener: Listener) -> ListenerId {
        let id =
            ListenerId(self.shared.next_listener.fetch_add(1, Ordering::SeqCst));
        self.listeners().push((id, Arc::from(listener)));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners().retain(|(listener, _)| *listener != id);
    }
}

#[async_trait]
impl Bindings for DevChain {
    async fn signer(&self) -> Result<Address> {
        let approved = self.state().approved;
        let account = if approved {
            self.selected()
        } else {
            self.request_accounts()
                .await?
                .into_iter()
                .next()
                .ok_or(Error::UserRejected)?
        };
        account.parse()
    }

    fn access_control(
        &self,
        at: &Address,
        signer: &Address,
    ) -> Arc<dyn AccessControl> {
        Arc::new(DevContract {
            chain: self.clone(),
            at: at.clone(),
            signer: signer.clone(),
        })
    }

    fn election_manager(
        &self,
        at: &Address,
        signer: &Address,
    ) -> Arc<dyn ElectionManager> {
        Arc::new(DevContract {
            chain: self.clone(),
            at: at.clone(),
            signer: signer.clone(),
        })
    }

    async fn wait_for_receipt(&self, tx: &TxHash) -> Result<Receipt> {
        self.state()
            .receipts
            .get(tx)
            .map(|block| Receipt::new(tx.clone(), *block))
            .ok_or_else(|| {
                Error::ContractCallFailed(format!("unknown transaction {}", tx))
            })
    }
}

struct DevContract {
    chain: DevChain,
    at: Address,
    signer: Address,
}

impl DevContract {
    /// Locks the chain after checking there is code at the bound address.
    fn deployed(&self, expected: &str) -> Result<MutexGuard<ChainState>> {
        if self.at.as_str() != expected {
            return Err(Error::ContractCallFailed(format!(
                "no contract code at {}",
                self.at
            )))
        }
        Ok(self.chain.state())
    }

    fn read(&self, expected: &str) -> Result<MutexGuard<ChainState>> {
        let state = self.deployed(expected)?;
        state.readable()?;
        Ok(state)
    }
}

#[async_trait]
impl AccessControl for DevContract {
    async fn is_admin(&self, who: &Address) -> Result<bool> {
        let state = self.read(ACCESS_CONTROL_ADDRESS)?;
        Ok(state.admins.contains(who))
    }

    async fn add_admin(&self, who: &Address) -> Result<TxHash> {
        let mut state = self.deployed(ACCESS_CONTROL_ADDRESS)?;
        state.require_admin(&self.signer, "Auth: caller is not an admin")?;
        state.admins.insert(who.clone());
        Ok(state.mine())
    }

    async fn remove_admin(&self, who: &Address) -> Result<TxHash> {
        let mut state = self.deployed(ACCESS_CONTROL_ADDRESS)?;
        state.require_admin(&self.signer, "Auth: caller is not an admin")?;
        state.admins.remove(who);
        Ok(state.mine())
    }
}

#[async_trait]
impl ElectionManager for DevContract {
    async fn election_count(&self) -> Result<u64> {
        let state = self.read(ELECTION_MANAGER_ADDRESS)?;
        Ok(state.ballots.len() as u64)
    }

    async fn get_election(&self, id: ElectionId) -> Result<ElectionRecord> {
        let state = self.read(ELECTION_MANAGER_ADDRESS)?;
        Ok(state.ballot(id)?.record.clone())
    }

    async fn has_voted(&self, id: ElectionId, who: &Address) -> Result<bool> {
        let state = self.read(ELECTION_MANAGER_ADDRESS)?;
        Ok(state.ballot(id)?.voters.contains(who))
    }

    async fn votes(&self, id: ElectionId, candidate: u32) -> Result<u64> {
        let state = self.read(ELECTION_MANAGER_ADDRESS)?;
        state
            .ballot(id)?
            .votes
            .get(candidate as usize)
            .copied()
            .ok_or_else(|| Error::from_revert("Invalid candidate"))
    }

    async fn create_election(&self, draft: &ElectionDraft) -> Result<TxHash> {
        let mut state = self.deployed(ELECTION_MANAGER_ADDRESS)?;
        state.require_admin(&self.signer, "Caller is not an admin")?;
        if draft.start_time >= draft.end_time {
            return Err(Error::from_revert(
                "Start time must be less than end time",
            ))
        }
        let id = state.ballots.len() as u64 + 1;
        state.ballots.push(Ballot {
            record: ElectionRecord {
                id,
                title: draft.title.clone(),
                description: draft.description.clone(),
                candidates: draft.candidates.clone(),
                start_time: draft.start_time,
                end_time: draft.end_time,
                active: true,
            },
            votes: vec![0; draft.candidates.len()],
            voters: HashSet::new(),
            published: None,
        });
        Ok(state.mine())
    }

    async fn vote(&self, id: ElectionId, candidate: u32) -> Result<TxHash> {
        let mut state = self.deployed(ELECTION_MANAGER_ADDRESS)?;
        let now = state.now;
        let ballot = state.ballot_mut(id)?;
        let record = &ballot.record;
        if !record.active || now < record.start_time || now > record.end_time {
            return Err(Error::from_revert("Election is not active"))
        }
        if ballot.voters.contains(&self.signer) {
            return Err(Error::from_revert("Already voted"))
        }
        let slot = ballot
            .votes
            .get_mut(candidate as usize)
            .ok_or_else(|| Error::from_revert("Invalid candidate"))?;
        *slot += 1;
        ballot.voters.insert(self.signer.clone());
        Ok(state.mine())
    }

    async fn compute_winner(&self, id: ElectionId) -> Result<String> {
        let state = self.read(ELECTION_MANAGER_ADDRESS)?;
        let ballot = state.ballot(id)?;
        if state.now <= ballot.record.end_time {
            return Err(Error::from_revert("Election has not ended yet"))
        }
        Ok(ballot.tally().winner)
    }

    async fn get_election_results(
        &self,
        id: ElectionId,
    ) -> Result<ElectionResult> {
        let state = self.read(ELECTION_MANAGER_ADDRESS)?;
        Ok(state.ballot(id)?.tally())
    }

    async fn results_published(&self, id: ElectionId) -> Result<bool> {
        let state = self.read(ELECTION_MANAGER_ADDRESS)?;
        Ok(state.ballot(id)?.published.is_some())
    }

    async fn publish_results(&self, id: ElectionId) -> Result<TxHash> {
        let mut state = self.deployed(ELECTION_MANAGER_ADDRESS)?;
        state.require_admin(&self.signer, "Caller is not an admin")?;
        let now = state.now;
        let ballot = state.ballot_mut(id)?;
        if now <= ballot.record.end_time {
            return Err(Error::from_revert("Election has not ended yet"))
        }
        if ballot.published.is_some() {
            return Err(Error::from_revert("Results already published"))
        }
        ballot.published = Some(ballot.tally());
        Ok(state.mine())
    }

    async fn published_results(&self, id: ElectionId) -> Result<ElectionResult> {
        let state = self.read(ELECTION_MANAGER_ADDRESS)?;
        Ok(state.ballot(id)?.published.clone().unwrap_or_default())
    }
}
