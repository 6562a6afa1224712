//! Wallet session state: who is connected, on which chain, and whether the
//! access-control contract currently recognises them as an admin.
use crate::{
    address::Address,
    cache::AccountCache,
    config::Config,
    election::Aggregator,
    error::{
        Error,
        Result,
    },
    gateway::{
        Bindings,
        ContractKind,
        Gateway,
        Receipt,
    },
    task::ScopedTask,
    wallet::{
        Subscription,
        WalletConnector,
    },
};
use async_std::task;
use core::ops::ControlFlow;
use serde::Serialize;
use std::sync::{
    atomic::{
        AtomicU64,
        AtomicUsize,
        Ordering,
    },
    Arc,
    Mutex,
    MutexGuard,
    PoisonError,
};

pub const REVOKED_MESSAGE: &str =
    "Your admin rights have been revoked. Logging out.";

/// Session of the current tab. Empty strings stand for absent values.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Session {
    pub account: String,
    pub chain_id: String,
    pub is_on_desired_network: bool,
    pub is_admin: bool,
    pub is_loading: bool,
    pub error: String,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum AuthState {
    Unauthenticated,
    Verifying,
    WrongNetwork,
    User,
    Admin,
    Error,
}

impl Session {
    pub fn state(&self) -> AuthState {
        if self.is_loading {
            return AuthState::Verifying
        }
        if self.account.is_empty() {
            return if self.error.is_empty() {
                AuthState::Unauthenticated
            } else {
                AuthState::Error
            }
        }
        if !self.is_on_desired_network {
            AuthState::WrongNetwork
        } else if !self.error.is_empty() {
            AuthState::Error
        } else if self.is_admin {
            AuthState::Admin
        } else {
            AuthState::User
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ObserverId(usize);

type Observer = Arc<dyn Fn(&Session) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner<B: Bindings> {
    config: Config,
    wallet: WalletConnector<B>,
    gateway: Arc<Gateway<B>>,
    cache: Option<AccountCache>,
    session: Mutex<Session>,
    /// Bumped under the session lock by every trigger.
    generation: AtomicU64,
    /// Either the admin re-validation or a pending forced logout.
    timer: Mutex<Option<ScopedTask>>,
    subscriptions: Mutex<Vec<Subscription<B>>>,
    observers: Mutex<Vec<(ObserverId, Observer)>>,
    next_observer: AtomicUsize,
}

impl<B: Bindings> Inner<B> {
    fn snapshot(&self) -> Session {
        lock(&self.session).clone()
    }

    fn notify(&self, session: &Session) {
        let observers: Vec<Observer> =
            lock(&self.observers).iter().map(|(_, o)| o.clone()).collect();
        for observer in observers {
            observer(session);
        }
    }

    /// Starts a new generation, superseding every verification in flight
    /// and dropping the timer of the previous one.
    fn begin<F: FnOnce(&mut Session)>(&self, f: F) -> u64 {
        let (generation, snapshot) = {
            let mut timer = lock(&self.timer);
            timer.take();
            let mut session = lock(&self.session);
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            f(&mut session);
            (generation, session.clone())
        };
        self.notify(&snapshot);
        generation
    }

    /// Applies `f` only if no newer trigger happened since `generation`.
    fn apply<F: FnOnce(&mut Session)>(&self, generation: u64, f: F) -> bool {
        let snapshot = {
            let mut session = lock(&self.session);
            if self.generation.load(Ordering::SeqCst) != generation {
                log::debug!("discarding result of stale generation {}", generation);
                return false
            }
            f(&mut session);
            session.clone()
        };
        self.notify(&snapshot);
        true
    }

    fn update<F: FnOnce(&mut Session)>(&self, f: F) {
        let snapshot = {
            let mut session = lock(&self.session);
            f(&mut session);
            session.clone()
        };
        self.notify(&snapshot);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn disarm(&self) {
        lock(&self.timer).take();
    }

    /// Installs `task` as the session timer unless `generation` has been
    /// superseded. Lock order is timer, then session.
    fn install(&self, generation: u64, task: impl FnOnce() -> ScopedTask) {
        let mut timer = lock(&self.timer);
        if !self.is_current(generation) {
            log::debug!("not arming timer of stale generation {}", generation);
            return
        }
        *timer = Some(task());
    }

    fn subscribe(self: &Arc<Self>) -> Result<()> {
        let mut subscriptions = lock(&self.subscriptions);
        if !subscriptions.is_empty() {
            return Ok(())
        }
        let weak = Arc::downgrade(self);
        let accounts = self.wallet.on_accounts_changed(move |accounts| {
            if let Some(inner) = weak.upgrade() {
                inner.accounts_changed(accounts);
            }
        })?;
        let weak = Arc::downgrade(self);
        let chains = self.wallet.on_chain_changed(move |chain_id| {
            if let Some(inner) = weak.upgrade() {
                inner.chain_changed(chain_id);
            }
        })?;
        subscriptions.push(accounts);
        subscriptions.push(chains);
        Ok(())
    }

    fn accounts_changed(self: &Arc<Self>, accounts: Vec<String>) {
        let account = accounts
            .first()
            .map(|account| account.to_lowercase())
            .unwrap_or_default();
        if account.is_empty() {
            log::info!("wallet disconnected");
        } else {
            log::info!("wallet switched to {}", account);
        }
        let generation = self.begin(|session| {
            session.account = account;
            session.is_admin = false;
            session.is_loading = true;
            session.error.clear();
        });
        self.spawn_verify(generation);
    }

    fn chain_changed(self: &Arc<Self>, chain_id: String) {
        log::info!("wallet switched to chain {}", chain_id);
        let desired = self.config.is_desired_chain(&chain_id);
        let generation = self.begin(|session| {
            session.chain_id = chain_id;
            session.is_on_desired_network = desired;
            session.is_admin = false;
            session.is_loading = true;
            session.error.clear();
        });
        self.spawn_verify(generation);
    }

    fn spawn_verify(self: &Arc<Self>, generation: u64) {
        let inner = self.clone();
        task::spawn(async move { inner.verify(generation).await });
    }

    async fn verify(self: &Arc<Self>, generation: u64) {
        let session = self.snapshot();
        if session.account.is_empty() {
            self.apply(generation, |s| s.is_loading = false);
            return
        }
        if !self.config.is_desired_chain(&session.chain_id) {
            let error =
                Error::WrongNetwork(self.config.desired_chain_id.clone());
            self.apply(generation, |s| {
                s.is_on_desired_network = false;
                s.is_admin = false;
                s.is_loading = false;
                s.error = error.to_string();
            });
            return
        }
        match self.check_admin(&session.account).await {
            Ok(is_admin) => {
                let applied = self.apply(generation, |s| {
                    s.is_on_desired_network = true;
                    s.is_admin = is_admin;
                    s.is_loading = false;
                    s.error.clear();
                });
                if applied {
                    log::info!(
                        "{} verified as {}",
                        session.account,
                        if is_admin { "admin" } else { "user" }
                    );
                    if is_admin {
                        self.arm(generation);
                    }
                }
            }
            Err(err) => {
                log::error!("verification of {} failed: {}", session.account, err);
                self.apply(generation, |s| {
                    s.is_admin = false;
                    s.is_loading = false;
                    s.error = err.to_string();
                });
            }
        }
    }

    /// Rebinds the contracts to the account's signer and asks whether it
    /// is an admin.
    async fn check_admin(&self, account: &str) -> Result<bool> {
        let address = Address::from_account(account)?;
        let at = self.config.access_control_address()?;
        self.gateway
            .init_contract(ContractKind::AccessControl, &at)
            .await?;
        if let Ok(at) = self.config.election_manager_address() {
            if let Err(err) = self
                .gateway
                .init_contract(ContractKind::ElectionManagement, &at)
                .await
            {
                log::warn!("could not rebind election contract: {}", err);
            }
        }
        self.gateway.is_admin(&address).await
    }

    fn arm(self: &Arc<Self>, generation: u64) {
        let weak = Arc::downgrade(self);
        let period = self.config.revalidate_interval;
        self.install(generation, move || {
            ScopedTask::every("admin-revalidation", period, move || {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(inner) => inner.revalidate(generation).await,
                        None => ControlFlow::Break(()),
                    }
                }
            })
        });
    }

    async fn revalidate(self: &Arc<Self>, generation: u64) -> ControlFlow<()> {
        if !self.is_current(generation) {
            return ControlFlow::Break(())
        }
        let account = self.snapshot().account;
        let address = match Address::from_account(&account) {
            Ok(address) => address,
            Err(_) => return ControlFlow::Break(()),
        };
        match self.gateway.is_admin(&address).await {
            Ok(true) => ControlFlow::Continue(()),
            Ok(false) => {
                let revoked = self.apply(generation, |s| {
                    s.is_admin = false;
                    s.error = REVOKED_MESSAGE.to_string();
                });
                if revoked {
                    log::info!("admin rights of {} revoked", account);
                    self.schedule_logout(generation);
                }
                ControlFlow::Break(())
            }
            Err(err) => {
                log::warn!("admin re-validation of {} failed: {}", account, err);
                ControlFlow::Continue(())
            }
        }
    }

    fn schedule_logout(self: &Arc<Self>, generation: u64) {
        let weak = Arc::downgrade(self);
        let grace = self.config.revocation_grace;
        self.install(generation, move || {
            ScopedTask::spawn("forced-logout", async move {
                task::sleep(grace).await;
                if let Some(inner) = weak.upgrade() {
                    if inner.is_current(generation) {
                        task::spawn(async move { inner.logout().await });
                    }
                }
            })
        });
    }

    async fn logout(&self) {
        self.begin(|session| *session = Session::default());
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.clear().await {
                log::warn!("could not clear {}: {}", cache.path().display(), err);
            }
        }
        self.gateway.reset().await;
        log::info!("logged out");
    }
}

/// Drives the session through connect, wallet events, verification and
/// periodic admin re-validation.
pub struct Authenticator<B: Bindings> {
    inner: Arc<Inner<B>>,
}

impl<B: Bindings> Clone for Authenticator<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: Bindings> Authenticator<B> {
    /// `backend` is `None` when no wallet extension is installed.
    pub fn new(config: Config, backend: Option<Arc<B>>) -> Self {
        Self::build(config, backend, None)
    }

    /// Like `new`, remembering the last connected account in `cache`.
    pub fn with_cache(
        config: Config,
        backend: Option<Arc<B>>,
        cache: AccountCache,
    ) -> Self {
        Self::build(config, backend, Some(cache))
    }

    fn build(
        config: Config,
        backend: Option<Arc<B>>,
        cache: Option<AccountCache>,
    ) -> Self {
        let session = Session {
            is_loading: true,
            ..Session::default()
        };
        Self {
            inner: Arc::new(Inner {
                config,
                wallet: WalletConnector::new(backend.clone()),
                gateway: Arc::new(Gateway::new(backend)),
                cache,
                session: Mutex::new(session),
                generation: AtomicU64::new(0),
                timer: Mutex::new(None),
                subscriptions: Mutex::new(Vec::new()),
                observers: Mutex::new(Vec::new()),
                next_observer: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn gateway(&self) -> &Arc<Gateway<B>> {
        &self.inner.gateway
    }

    /// Election access sharing this session's contract bindings.
    pub fn aggregator(&self) -> Aggregator<B> {
        Aggregator::new(self.inner.config.clone(), self.inner.gateway.clone())
    }

    pub fn session(&self) -> Session {
        self.inner.snapshot()
    }

    pub fn state(&self) -> AuthState {
        self.session().state()
    }

    /// Calls `f` with a snapshot after every session change.
    pub fn observe<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        let id =
            ObserverId(self.inner.next_observer.fetch_add(1, Ordering::SeqCst));
        lock(&self.inner.observers).push((id, Arc::new(f)));
        id
    }

    pub fn unobserve(&self, id: ObserverId) {
        lock(&self.inner.observers).retain(|(observer, _)| *observer != id);
    }

    /// Subscribes to wallet events and restores an already approved
    /// account without prompting.
    pub async fn mount(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.wallet.is_available() {
            log::warn!("{}", Error::WalletUnavailable);
            inner.begin(|session| *session = Session::default());
            return Ok(())
        }
        inner.subscribe()?;
        let live: Result<(Vec<String>, String)> = async {
            let accounts = inner.wallet.get_accounts().await?;
            let chain_id = inner.wallet.get_chain_id().await?;
            Ok::<_, Error>((accounts, chain_id))
        }
        .await;
        let (accounts, chain_id) = match live {
            Ok(live) => live,
            Err(err) => {
                inner.begin(|session| {
                    session.is_loading = false;
                    session.error = err.to_string();
                });
                return Err(err)
            }
        };
        let cached = match &inner.cache {
            Some(cache) => {
                cache.load().await.unwrap_or_else(|err| {
                    log::warn!("could not read {}: {}", cache.path().display(), err);
                    None
                })
            }
            None => None,
        };
        let account = restore_account(&accounts, cached.as_deref());
        let desired = inner.config.is_desired_chain(&chain_id);
        let generation = inner.begin(|session| {
            session.account = account;
            session.chain_id = chain_id;
            session.is_on_desired_network = desired;
            session.is_admin = false;
            session.is_loading = true;
            session.error.clear();
        });
        inner.verify(generation).await;
        Ok(())
    }

    /// Releases the wallet listeners and stops background checks.
    pub fn unmount(&self) {
        self.inner.disarm();
        lock(&self.inner.subscriptions).clear();
    }

    /// Prompts the wallet and verifies the account it hands out.
    /// Verification failures land in the session rather than the result.
    pub async fn connect(&self) -> Result<Session> {
        let inner = &self.inner;
        let prompt: Result<(String, String)> = async {
            let account = inner.wallet.request_account().await?;
            let chain_id = inner.wallet.get_chain_id().await?;
            Ok::<_, Error>((account, chain_id))
        }
        .await;
        let (account, chain_id) = match prompt {
            Ok(prompt) => prompt,
            Err(err) => {
                log::error!("connect failed: {}", err);
                inner.update(|session| {
                    session.is_loading = false;
                    session.error = err.to_string();
                });
                return Err(err)
            }
        };
        let account = account.to_lowercase();
        log::info!("connected {} on chain {}", account, chain_id);
        if let Err(err) = inner.subscribe() {
            log::warn!("wallet events unavailable: {}", err);
        }
        let desired = inner.config.is_desired_chain(&chain_id);
        let generation = inner.begin(|session| {
            session.account = account.clone();
            session.chain_id = chain_id;
            session.is_on_desired_network = desired;
            session.is_admin = false;
            session.is_loading = true;
            session.error.clear();
        });
        inner.verify(generation).await;
        if let Some(cache) = &inner.cache {
            if let Err(err) = cache.store(&account).await {
                log::warn!("could not write {}: {}", cache.path().display(), err);
            }
        }
        Ok(inner.snapshot())
    }

    /// Verifies the current account again.
    pub async fn refresh(&self) -> Session {
        let inner = &self.inner;
        let generation = inner.begin(|session| {
            session.is_loading = true;
            session.error.clear();
        });
        inner.verify(generation).await;
        inner.snapshot()
    }

    pub async fn logout(&self) {
        self.inner.logout().await
    }

    /// The connected account, provided it is on the desired network.
    pub fn require_user(&self) -> Result<Address> {
        let session = self.session();
        if session.account.is_empty() {
            return Err(Error::NotConnected)
        }
        if !session.is_on_desired_network {
            return Err(Error::WrongNetwork(
                self.inner.config.desired_chain_id.clone(),
            ))
        }
        Address::from_account(&session.account)
    }

    pub fn require_admin(&self) -> Result<Address> {
        let account = self.require_user()?;
        if self.session().is_admin {
            Ok(account)
        } else {
            Err(Error::NotAdmin)
        }
    }

    pub async fn check_admin(&self, who: &str) -> Result<bool> {
        let who: Address = who.parse()?;
        self.inner.gateway.is_admin(&who).await
    }

    pub async fn add_admin(&self, who: &str) -> Result<Receipt> {
        let who: Address = who.parse()?;
        self.require_admin()?;
        let receipt = self.inner.gateway.add_admin(&who).await?;
        log::info!("granted admin rights to {} in {}", who, receipt.tx);
        Ok(receipt)
    }

    /// Removing the session's own account re-verifies it right away.
    pub async fn remove_admin(&self, who: &str) -> Result<Receipt> {
        let who: Address = who.parse()?;
        let account = self.require_admin()?;
        let receipt = self.inner.gateway.remove_admin(&who).await?;
        log::info!("revoked admin rights of {} in {}", who, receipt.tx);
        if who == account {
            self.refresh().await;
        }
        Ok(receipt)
    }
}

/// Picks the account to restore. The cached account only breaks ties
/// among the accounts the wallet reports live.
fn restore_account(live: &[String], cached: Option<&str>) -> String {
    let live: Vec<String> = live.iter().map(|a| a.to_lowercase()).collect();
    cached
        .map(str::to_lowercase)
        .filter(|cached| live.contains(cached))
        .or_else(|| live.into_iter().next())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{
        DevChain,
        ACCESS_CONTROL_ADDRESS,
        ALICE,
        BOB,
        CAROL,
        ELECTION_MANAGER_ADDRESS,
    };
    use async_std::future::timeout;
    use core::time::Duration;
    use std::time::Instant;
    use tempdir::TempDir;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn config() -> Config {
        Config::new(ACCESS_CONTROL_ADDRESS, ELECTION_MANAGER_ADDRESS)
            .with_timings(ms(40), ms(30), ms(20))
    }

    fn authenticator(chain: &DevChain) -> Authenticator<DevChain> {
        Authenticator::new(config(), Some(Arc::new(chain.clone())))
    }

    /// Waits until the session satisfies `done`.
    async fn settle<F>(auth: &Authenticator<DevChain>, done: F) -> Session
    where
        F: Fn(&Session) -> bool,
    {
        let wait = async {
            loop {
                let session = auth.session();
                if done(&session) {
                    return session
                }
                task::sleep(ms(2)).await;
            }
        };
        match timeout(Duration::from_secs(2), wait).await {
            Ok(session) => session,
            Err(_) => panic!("session never settled: {:?}", auth.session()),
        }
    }

    fn record(auth: &Authenticator<DevChain>) -> Arc<Mutex<Vec<Session>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        auth.observe(move |session| sink.lock().unwrap().push(session.clone()));
        seen
    }

    #[async_std::test]
    async fn starts_verifying_until_mounted() {
        let chain = DevChain::new(ALICE);
        let auth = authenticator(&chain);
        assert_eq!(auth.state(), AuthState::Verifying);
        auth.mount().await.unwrap();
        assert_eq!(auth.state(), AuthState::Unauthenticated);
        assert_eq!(chain.prompt_count(), 0);
        assert_eq!(chain.listener_count(), 2);
    }

    #[async_std::test]
    async fn silent_restore_verifies_approved_account() {
        let chain = DevChain::new(ALICE);
        chain.approve();
        let auth = authenticator(&chain);
        auth.mount().await.unwrap();
        let session = auth.session();
        assert_eq!(session.account, ALICE);
        assert_eq!(session.state(), AuthState::Admin);
        assert_eq!(chain.prompt_count(), 0);
    }

    #[async_std::test]
    async fn missing_wallet_stays_unauthenticated() {
        let _ = env_logger::try_init();
        let auth = Authenticator::<DevChain>::new(config(), None);
        auth.mount().await.unwrap();
        assert_eq!(auth.state(), AuthState::Unauthenticated);
        assert!(matches!(auth.connect().await, Err(Error::WalletUnavailable)));
        assert_eq!(auth.state(), AuthState::Error);
    }

    #[async_std::test]
    async fn admin_connect_then_chain_switch() {
        let chain = DevChain::new(ALICE);
        let auth = authenticator(&chain);
        auth.mount().await.unwrap();
        let session = auth.connect().await.unwrap();
        assert_eq!(
            session,
            Session {
                account: ALICE.into(),
                chain_id: "0x7a69".into(),
                is_on_desired_network: true,
                is_admin: true,
                is_loading: false,
                error: String::new(),
            }
        );
        assert_eq!(auth.require_admin().unwrap().as_str(), ALICE);

        let seen = record(&auth);
        chain.switch_chain("0x1");
        let settled = settle(&auth, |s| !s.is_loading).await;
        assert_eq!(settled.state(), AuthState::WrongNetwork);
        assert!(!settled.is_admin);
        assert_eq!(settled.error, "Please switch to chain ID 0x7a69.");

        let seen = seen.lock().unwrap();
        let first = &seen[0];
        assert_eq!(first.chain_id, "0x1");
        assert!(!first.is_admin);
        assert!(first.is_loading);
        assert!(seen.iter().all(|s| !s.is_admin));
        drop(seen);
        assert!(matches!(auth.require_user(), Err(Error::WrongNetwork(_))));

        chain.switch_chain("0x7A69");
        let back = settle(&auth, |s| !s.is_loading).await;
        assert_eq!(back.state(), AuthState::Admin);
        assert!(back.error.is_empty());
        assert_eq!(auth.require_admin().unwrap().as_str(), ALICE);
    }

    #[async_std::test]
    async fn account_change_never_carries_admin_over() {
        let chain = DevChain::new(ALICE);
        let auth = authenticator(&chain);
        auth.mount().await.unwrap();
        auth.connect().await.unwrap();
        let seen = record(&auth);

        chain.select_account(BOB);
        let settled = settle(&auth, |s| !s.is_loading).await;
        assert_eq!(settled.account, BOB);
        assert_eq!(settled.state(), AuthState::User);
        assert!(matches!(auth.require_admin(), Err(Error::NotAdmin)));
        {
            let seen = seen.lock().unwrap();
            assert!(seen[0].is_loading && !seen[0].is_admin);
            assert!(seen.iter().all(|s| !(s.account == BOB && s.is_admin)));
        }

        chain.select_account(ALICE);
        let settled = settle(&auth, |s| !s.is_loading).await;
        assert_eq!(settled.state(), AuthState::Admin);
    }

    #[async_std::test]
    async fn disconnect_returns_to_unauthenticated() {
        let chain = DevChain::new(ALICE);
        let auth = authenticator(&chain);
        auth.mount().await.unwrap();
        auth.connect().await.unwrap();
        chain.disconnect();
        let settled = settle(&auth, |s| !s.is_loading).await;
        assert_eq!(settled.state(), AuthState::Unauthenticated);
        assert!(!settled.is_admin);
        assert!(matches!(auth.require_user(), Err(Error::NotConnected)));
    }

    #[async_std::test]
    async fn revocation_logs_out_after_grace() {
        let chain = DevChain::new(ALICE);
        let config = config().with_timings(ms(40), ms(150), ms(20));
        let auth = Authenticator::new(config, Some(Arc::new(chain.clone())));
        auth.mount().await.unwrap();
        auth.connect().await.unwrap();

        chain.revoke_admin(ALICE);
        let revoked = settle(&auth, |s| s.error == REVOKED_MESSAGE).await;
        let revoked_at = Instant::now();
        assert!(!revoked.is_admin);
        assert_eq!(revoked.account, ALICE);

        task::sleep(ms(60)).await;
        let waiting = auth.session();
        assert_eq!(waiting.account, ALICE);
        assert_eq!(waiting.error, REVOKED_MESSAGE);

        let logged_out = settle(&auth, |s| s.account.is_empty()).await;
        assert!(revoked_at.elapsed() >= ms(100));
        assert_eq!(logged_out, Session::default());
        let unbound = timeout(Duration::from_secs(1), async {
            while auth.gateway().binding(ContractKind::AccessControl).await.is_some() {
                task::sleep(ms(2)).await;
            }
        });
        assert!(unbound.await.is_ok());
    }

    #[async_std::test]
    async fn superseded_verification_cannot_replace_the_timer() {
        let chain = DevChain::new(ALICE);
        let auth = authenticator(&chain);
        auth.mount().await.unwrap();
        auth.connect().await.unwrap();

        let current = auth.inner.generation.load(Ordering::SeqCst);
        auth.inner.arm(current - 1);
        auth.inner.schedule_logout(current - 1);
        chain.revoke_admin(ALICE);
        let revoked = settle(&auth, |s| s.error == REVOKED_MESSAGE).await;
        assert!(!revoked.is_admin);
        settle(&auth, |s| s.account.is_empty()).await;
    }

    #[async_std::test]
    async fn transient_failures_keep_the_session() {
        let chain = DevChain::new(ALICE);
        let auth = authenticator(&chain);
        auth.mount().await.unwrap();
        auth.connect().await.unwrap();

        chain.fail_reads(true);
        task::sleep(ms(150)).await;
        let session = auth.session();
        assert_eq!(session.state(), AuthState::Admin);
        assert_eq!(session.account, ALICE);

        chain.fail_reads(false);
        chain.revoke_admin(ALICE);
        settle(&auth, |s| s.error == REVOKED_MESSAGE).await;
    }

    #[async_std::test]
    async fn missing_contract_address_fails_closed() {
        let chain = DevChain::new(ALICE);
        let config = Config {
            access_control: None,
            ..config()
        };
        let auth = Authenticator::new(config, Some(Arc::new(chain)));
        let session = auth.connect().await.unwrap();
        assert!(!session.is_admin);
        assert!(!session.is_loading);
        assert!(session.error.contains("BALLOT_ACCESS_CONTROL_ADDRESS"));
        assert_eq!(session.state(), AuthState::Error);
        assert_eq!(
            auth.gateway().binding(ContractKind::AccessControl).await,
            None
        );
    }

    #[async_std::test]
    async fn rejected_prompt_is_surfaced() {
        let chain = DevChain::new(ALICE);
        chain.reject_prompts(true);
        let auth = authenticator(&chain);
        auth.mount().await.unwrap();
        assert!(matches!(auth.connect().await, Err(Error::UserRejected)));
        let session = auth.session();
        assert_eq!(session.error, Error::UserRejected.to_string());
        assert!(!session.is_loading);
        assert_eq!(chain.prompt_count(), 1);
    }

    #[async_std::test]
    async fn stale_generation_is_discarded() {
        let chain = DevChain::new(ALICE);
        let auth = authenticator(&chain);
        let stale = auth.inner.begin(|_| {});
        auth.inner.begin(|_| {});
        assert!(!auth.inner.apply(stale, |s| s.is_admin = true));
        assert!(!auth.session().is_admin);

        auth.mount().await.unwrap();
        auth.connect().await.unwrap();
        chain.select_account(BOB);
        chain.select_account(ALICE);
        chain.select_account(BOB);
        let settled = settle(&auth, |s| !s.is_loading).await;
        assert_eq!(settled.account, BOB);
        assert!(!settled.is_admin);
    }

    #[async_std::test]
    async fn admin_management() {
        let chain = DevChain::new(ALICE);
        let auth = authenticator(&chain);
        auth.mount().await.unwrap();
        auth.connect().await.unwrap();

        assert!(matches!(
            auth.add_admin("0x123").await,
            Err(Error::InvalidAddressFormat(_))
        ));
        assert!(!auth.check_admin(BOB).await.unwrap());
        auth.add_admin(&format!("  {}  ", BOB.to_uppercase().replace("0X", "0x")))
            .await
            .unwrap();
        assert!(auth.check_admin(BOB).await.unwrap());
        chain.grant_admin(CAROL);
        assert!(auth.check_admin(CAROL).await.unwrap());

        auth.remove_admin(ALICE).await.unwrap();
        assert_eq!(auth.state(), AuthState::User);
        assert!(matches!(auth.add_admin(ALICE).await, Err(Error::NotAdmin)));
        assert!(auth.check_admin(BOB).await.unwrap());
    }

    #[async_std::test]
    async fn cache_never_overrides_the_live_wallet() {
        let tmp = TempDir::new("ballot-auth-").unwrap();
        let cache = AccountCache::new(tmp.path().join("last-account"));
        cache.store(BOB).await.unwrap();

        let chain = DevChain::new(ALICE);
        chain.approve();
        let auth = Authenticator::with_cache(
            config(),
            Some(Arc::new(chain.clone())),
            cache.clone(),
        );
        auth.mount().await.unwrap();
        assert_eq!(auth.session().account, ALICE);

        auth.connect().await.unwrap();
        assert_eq!(cache.load().await.unwrap().as_deref(), Some(ALICE));
        auth.logout().await;
        assert_eq!(cache.load().await.unwrap(), None);
        assert_eq!(auth.session(), Session::default());
    }

    #[test]
    fn restore_prefers_cached_only_when_live() {
        let live = vec![BOB.to_string(), ALICE.to_string()];
        assert_eq!(restore_account(&live, Some(ALICE)), ALICE);
        assert_eq!(restore_account(&live, None), BOB);
        assert_eq!(restore_account(&live[..1], Some(ALICE)), BOB);
        assert_eq!(restore_account(&[], Some(ALICE)), "");
    }

    #[async_std::test]
    async fn unmount_releases_everything() {
        let chain = DevChain::new(ALICE);
        let auth = authenticator(&chain);
        auth.mount().await.unwrap();
        auth.connect().await.unwrap();
        assert_eq!(chain.listener_count(), 2);
        auth.unmount();
        assert_eq!(chain.listener_count(), 0);

        let other = authenticator(&chain);
        other.mount().await.unwrap();
        assert_eq!(chain.listener_count(), 2);
        drop(other);
        assert_eq!(chain.listener_count(), 0);
    }
}
