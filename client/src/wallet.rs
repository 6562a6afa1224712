//! Access to the injected wallet extension.
use crate::error::{
    Error,
    Result,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Notification pushed by the wallet extension.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WalletEvent {
    /// `accountsChanged`, an empty list means the wallet disconnected.
    AccountsChanged(Vec<String>),
    /// `chainChanged`
    ChainChanged(String),
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ListenerId(pub u64);

pub type Listener = Box<dyn Fn(&WalletEvent) + Send + Sync>;

/// The request/response and event surface of a wallet extension.
#[async_trait]
pub trait Provider: Send + Sync {
    /// `eth_requestAccounts`, may prompt the user.
    async fn request_accounts(&self) -> Result<Vec<String>>;
    /// `eth_accounts`, never prompts.
    async fn accounts(&self) -> Result<Vec<String>>;
    /// `eth_chainId`
    async fn chain_id(&self) -> Result<String>;
    fn add_listener(&self, listener: Listener) -> ListenerId;
    fn remove_listener(&self, id: ListenerId);
}

/// Registered wallet listener, removed again on drop.
pub struct Subscription<P: Provider> {
    provider: Arc<P>,
    id: Option<ListenerId>,
}

impl<P: Provider> Subscription<P> {
    pub fn id(&self) -> Option<ListenerId> {
        self.id
    }

    /// Unregisters the listener now.
    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(id) = self.id.take() {
            self.provider.remove_listener(id);
        }
    }
}

impl<P: Provider> Drop for Subscription<P> {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct WalletConnector<P> {
    provider: Option<Arc<P>>,
}

impl<P> Clone for WalletConnector<P> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
        }
    }
}

impl<P: Provider> WalletConnector<P> {
    /// `None` when no extension is installed.
    pub fn new(provider: Option<Arc<P>>) -> Self {
        Self { provider }
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_some()
    }

    fn provider(&self) -> Result<&Arc<P>> {
        self.provider.as_ref().ok_or(Error::WalletUnavailable)
    }

    /// Prompts the wallet for access and returns the primary account.
    pub async fn request_account(&self) -> Result<String> {
        self.provider()?
            .request_accounts()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::UserRejected)
    }

    pub async fn get_accounts(&self) -> Result<Vec<String>> {
        self.provider()?.accounts().await
    }

    pub async fn get_chain_id(&self) -> Result<String> {
        self.provider()?.chain_id().await
    }

    pub fn on_accounts_changed<F>(&self, handler: F) -> Result<Subscription<P>>
    where
        F: Fn(Vec<String>) + Send + Sync + 'static,
    {
        self.subscribe(Box::new(move |event| {
            if let WalletEvent::AccountsChanged(accounts) = event {
                handler(accounts.clone())
            }
        }))
    }

    pub fn on_chain_changed<F>(&self, handler: F) -> Result<Subscription<P>>
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.subscribe(Box::new(move |event| {
            if let WalletEvent::ChainChanged(chain_id) = event {
                handler(chain_id.clone())
            }
        }))
    }

    fn subscribe(&self, listener: Listener) -> Result<Subscription<P>> {
        let provider = self.provider()?.clone();
        let id = provider.add_listener(listener);
        Ok(Subscription {
            provider,
            id: Some(id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{
        DevChain,
        ALICE,
        BOB,
    };
    use std::sync::Mutex;

    #[async_std::test]
    async fn missing_extension_is_unavailable() {
        let wallet = WalletConnector::<DevChain>::new(None);
        assert!(!wallet.is_available());
        assert!(matches!(
            wallet.request_account().await,
            Err(Error::WalletUnavailable)
        ));
        assert!(matches!(
            wallet.get_accounts().await,
            Err(Error::WalletUnavailable)
        ));
        assert!(matches!(
            wallet.on_chain_changed(|_| {}),
            Err(Error::WalletUnavailable)
        ));
    }

    #[async_std::test]
    async fn request_account_prompts_once() {
        let chain = DevChain::new(ALICE);
        let wallet = WalletConnector::new(Some(Arc::new(chain.clone())));
        assert!(wallet.get_accounts().await.unwrap().is_empty());
        assert_eq!(wallet.request_account().await.unwrap(), ALICE);
        assert_eq!(wallet.get_accounts().await.unwrap(), vec![ALICE]);
        assert_eq!(wallet.get_chain_id().await.unwrap(), "0x7a69");
    }

    #[async_std::test]
    async fn rejected_prompt_is_not_retried() {
        let chain = DevChain::new(ALICE);
        chain.reject_prompts(true);
        let wallet = WalletConnector::new(Some(Arc::new(chain.clone())));
        assert!(matches!(
            wallet.request_account().await,
            Err(Error::UserRejected)
        ));
        assert_eq!(chain.prompt_count(), 1);
    }

    #[async_std::test]
    async fn subscriptions_are_released() {
        let chain = DevChain::new(ALICE);
        let wallet = WalletConnector::new(Some(Arc::new(chain.clone())));
        wallet.request_account().await.unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let accounts = wallet
            .on_accounts_changed(move |accounts| {
                sink.lock().unwrap().push(accounts)
            })
            .unwrap();
        let chains = wallet.on_chain_changed(|_| {}).unwrap();
        assert_eq!(chain.listener_count(), 2);
        assert!(accounts.id().is_some());
        assert_ne!(accounts.id(), chains.id());

        chain.select_account(BOB);
        chain.switch_chain("0x1");
        assert_eq!(*seen.lock().unwrap(), vec![vec![BOB.to_string()]]);

        accounts.dispose();
        assert_eq!(chain.listener_count(), 1);
        drop(chains);
        assert_eq!(chain.listener_count(), 0);

        chain.disconnect();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
