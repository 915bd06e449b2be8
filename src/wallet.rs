use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use eth_keystore::decrypt_key;
use ethers::{
    middleware::SignerMiddleware,
    providers::{Http, Middleware, Provider},
    signers::{LocalWallet, Signer},
    types::Address,
};
use rpassword::prompt_password;
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, instrument};

use crate::{
    config::AppConfig,
    error::{AppError, AppResult},
    implementations::network::{NetworkGuard, REQUIRED_CHAIN_ID},
};

/// Authorized connection to one account: a read-only provider plus a signer for the same wallet.
pub struct WalletHandle<P, S> {
    account: Address,
    provider: Arc<P>,
    signer: Arc<S>,
}

impl<P, S> WalletHandle<P, S> {
    pub fn new(account: Address, provider: Arc<P>, signer: Arc<S>) -> Self {
        Self {
            account,
            provider,
            signer,
        }
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn signer(&self) -> &Arc<S> {
        &self.signer
    }
}

impl<P, S> Clone for WalletHandle<P, S> {
    fn clone(&self) -> Self {
        Self {
            account: self.account,
            provider: self.provider.clone(),
            signer: self.signer.clone(),
        }
    }
}

impl<P, S> fmt::Debug for WalletHandle<P, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletHandle")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

/// Handle returned by [`WalletSession::execution_handle`].
pub enum ExecutionHandle<P, S> {
    Reader(Arc<P>),
    Writer(Arc<S>),
}

/// Wallet software able to hand out an authorized connection, possibly after asking the user.
#[async_trait]
pub trait WalletConnector: Send + Sync {
    type Provider: Middleware + 'static;
    type Signer: Middleware + 'static;

    async fn connect(&self) -> AppResult<WalletHandle<Self::Provider, Self::Signer>>;
}

type ConnectorFactory<C> = Box<dyn Fn() -> AppResult<C> + Send + Sync>;

/// Outcome of the most recent connect attempt.
struct ConnectSlot<P, S> {
    handle: Option<WalletHandle<P, S>>,
    last_error: Option<AppError>,
}

/// Owns the connector and the cached wallet handle for the lifetime of one session.
pub struct WalletSession<C: WalletConnector> {
    factory: ConnectorFactory<C>,
    connector: OnceCell<C>,
    slot: Mutex<ConnectSlot<C::Provider, C::Signer>>,
    // Bumped under the slot lock whenever an attempt finishes.
    attempts: AtomicU64,
    guard: NetworkGuard,
}

impl<C: WalletConnector> WalletSession<C> {
    /// The connector is built on first use, at most once per session.
    pub fn new<F>(factory: F, guard: NetworkGuard) -> Self
    where
        F: Fn() -> AppResult<C> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            connector: OnceCell::new(),
            slot: Mutex::new(ConnectSlot {
                handle: None,
                last_error: None,
            }),
            attempts: AtomicU64::new(0),
            guard,
        }
    }

    async fn connector(&self) -> AppResult<&C> {
        self.connector
            .get_or_try_init(|| async { (self.factory)() })
            .await
    }

    /// Return the cached handle, or run the connector's connect flow.
    ///
    /// Concurrent callers wait on the same attempt, so the user sees at most one prompt.
    /// Callers that queued behind a failed attempt get its error; the attempt is not retried.
    #[instrument(skip(self))]
    pub async fn ensure_connected(&self) -> AppResult<WalletHandle<C::Provider, C::Signer>> {
        let seen = self.attempts.load(Ordering::Acquire);
        let mut slot = self.slot.lock().await;
        if let Some(handle) = slot.handle.as_ref() {
            return Ok(handle.clone());
        }
        if self.attempts.load(Ordering::Acquire) != seen {
            if let Some(err) = slot.last_error.clone() {
                return Err(err);
            }
        }

        let outcome = match self.connector().await {
            Ok(connector) => connector.connect().await,
            Err(err) => Err(err),
        };
        self.attempts.fetch_add(1, Ordering::AcqRel);

        match outcome {
            Ok(handle) => {
                info!(account = ?handle.account(), "wallet connected");
                slot.handle = Some(handle.clone());
                slot.last_error = None;
                Ok(handle)
            }
            Err(err) => {
                slot.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    pub async fn current(&self) -> Option<WalletHandle<C::Provider, C::Signer>> {
        self.slot.lock().await.handle.clone()
    }

    /// Forget the cached handle, e.g. after the wallet reported a disconnect.
    pub async fn invalidate(&self) {
        if let Some(handle) = self.slot.lock().await.handle.take() {
            info!(account = ?handle.account(), "wallet handle invalidated");
        }
    }

    /// Read-capable handle, validated against the required network.
    pub async fn reader(&self) -> AppResult<Arc<C::Provider>> {
        let handle = self.ensure_connected().await?;
        self.guard.validate(handle.provider().as_ref()).await?;
        Ok(handle.provider().clone())
    }

    /// Signing handle, validated against the required network.
    pub async fn writer(&self) -> AppResult<Arc<C::Signer>> {
        let handle = self.ensure_connected().await?;
        self.guard.validate(handle.provider().as_ref()).await?;
        Ok(handle.signer().clone())
    }

    pub async fn execution_handle(
        &self,
        needs_write: bool,
    ) -> AppResult<ExecutionHandle<C::Provider, C::Signer>> {
        if needs_write {
            self.writer().await.map(ExecutionHandle::Writer)
        } else {
            self.reader().await.map(ExecutionHandle::Reader)
        }
    }
}

/// Where the connector finds the account key.
#[derive(Clone)]
pub enum KeySource {
    PrivateKey(String),
    /// Encrypted JSON keystore, unlocked with a password typed at connect time.
    Keystore(PathBuf),
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::PrivateKey(_) => f.write_str("PrivateKey(<redacted>)"),
            KeySource::Keystore(path) => f.debug_tuple("Keystore").field(path).finish(),
        }
    }
}

/// Connector backed by a JSON-RPC endpoint and a locally held key.
#[derive(Debug, Clone)]
pub struct LocalKeyConnector {
    provider: Arc<Provider<Http>>,
    key_source: KeySource,
}

impl LocalKeyConnector {
    pub fn new(provider: Arc<Provider<Http>>, key_source: KeySource) -> Self {
        Self {
            provider,
            key_source,
        }
    }

    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let provider = Provider::<Http>::try_from(config.eth_rpc_url.as_str())
            .map_err(|err| AppError::Config(format!("failed to create provider: {err}")))?
            .interval(Duration::from_millis(config.poll_interval_ms));

        let key_source = match (&config.keystore_path, &config.private_key) {
            (Some(path), _) => KeySource::Keystore(PathBuf::from(path)),
            (None, Some(key)) => KeySource::PrivateKey(key.clone()),
            (None, None) => {
                return Err(AppError::Config(
                    "no wallet configured: set KEYSTORE_PATH or PRIVATE_KEY".into(),
                ));
            }
        };

        Ok(Self::new(Arc::new(provider), key_source))
    }

    async fn unlock(&self) -> AppResult<LocalWallet> {
        match &self.key_source {
            KeySource::PrivateKey(key) => parse_private_key(key),
            KeySource::Keystore(path) => {
                let path = path.clone();
                // The password prompt blocks on the terminal.
                tokio::task::spawn_blocking(move || unlock_keystore(&path))
                    .await
                    .map_err(|err| AppError::Internal(format!("keystore unlock task failed: {err}")))?
            }
        }
    }
}

#[async_trait]
impl WalletConnector for LocalKeyConnector {
    type Provider = Provider<Http>;
    type Signer = SignerMiddleware<Arc<Provider<Http>>, LocalWallet>;

    async fn connect(&self) -> AppResult<WalletHandle<Self::Provider, Self::Signer>> {
        let wallet = self.unlock().await?.with_chain_id(REQUIRED_CHAIN_ID);
        let account = wallet.address();
        let signer = SignerMiddleware::new(self.provider.clone(), wallet);
        Ok(WalletHandle::new(
            account,
            self.provider.clone(),
            Arc::new(signer),
        ))
    }
}

fn parse_private_key(key: &str) -> AppResult<LocalWallet> {
    let trimmed = key.trim().trim_start_matches("0x");
    LocalWallet::from_str(trimmed)
        .map_err(|err| AppError::Wallet(format!("failed to parse private key: {err}")))
}

fn unlock_keystore(path: &Path) -> AppResult<LocalWallet> {
    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("wallet");

    let password = prompt_password(format!(
        "Unlock wallet '{name}' to connect (leave empty to decline): "
    ))
    .map_err(|err| AppError::ConnectionRejected(format!("password prompt failed: {err}")))?;

    if password.is_empty() {
        return Err(AppError::ConnectionRejected(
            "user declined the connection request".into(),
        ));
    }

    let secret = decrypt_key(path, password.as_bytes())
        .map_err(|_| AppError::ConnectionRejected(format!("invalid password for wallet '{name}'")))?;

    LocalWallet::from_bytes(&secret)
        .map_err(|err| AppError::Wallet(format!("keystore does not hold a valid key: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        notify::recording::RecordingNotifier,
        test_support::{MockConnector, SEPOLIA_HEX},
    };

    const TEST_KEY: &str = "0x59c6995e998f97a5a0044966f0945382d0b7adf99019cba46777e1fbbf3a1b02";

    fn session(connector: MockConnector) -> (WalletSession<MockConnector>, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let guard = NetworkGuard::new("sepolia", notifier.clone());
        (WalletSession::new(move || Ok(connector.clone()), guard), notifier)
    }

    #[test]
    fn parses_private_key_with_and_without_prefix() {
        let with_prefix = parse_private_key(TEST_KEY).unwrap();
        let without_prefix = parse_private_key(TEST_KEY.trim_start_matches("0x")).unwrap();
        assert_eq!(with_prefix.address(), without_prefix.address());
    }

    #[test]
    fn rejects_garbage_private_key() {
        let err = parse_private_key("0xnot-a-key").unwrap_err();
        assert!(matches!(err, AppError::Wallet(_)));
    }

    #[test]
    fn key_source_debug_hides_private_key() {
        let rendered = format!("{:?}", KeySource::PrivateKey(TEST_KEY.into()));
        assert!(!rendered.contains("59c6995e"));
    }

    #[test]
    fn from_config_requires_a_key_source() {
        let cfg = AppConfig::from_toml_str(
            r#"
            eth_rpc_url = "http://localhost:8545"
            contract_address = "0x0000000000000000000000000000000000000042"
            "#,
        )
        .unwrap();
        assert!(matches!(
            LocalKeyConnector::from_config(&cfg),
            Err(AppError::Config(_))
        ));
    }

    #[tokio::test]
    async fn local_key_connector_signs_for_configured_account() {
        let provider = Provider::<Http>::try_from("http://localhost:8545").unwrap();
        let connector =
            LocalKeyConnector::new(Arc::new(provider), KeySource::PrivateKey(TEST_KEY.into()));

        let handle = connector.connect().await.unwrap();
        let expected = parse_private_key(TEST_KEY).unwrap().address();
        assert_eq!(handle.account(), expected);
        assert_eq!(handle.signer().signer().chain_id(), REQUIRED_CHAIN_ID);
    }

    #[tokio::test]
    async fn ensure_connected_reuses_cached_handle() {
        let connector = MockConnector::new();
        let (session, _) = session(connector.clone());

        let first = session.ensure_connected().await.unwrap();
        let second = session.ensure_connected().await.unwrap();

        assert_eq!(connector.connect_count(), 1);
        assert!(Arc::ptr_eq(first.provider(), second.provider()));
        assert_eq!(first.account(), second.account());
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_connect() {
        let connector = MockConnector::new();
        let (session, _) = session(connector.clone());

        let (a, b) = tokio::join!(session.ensure_connected(), session.ensure_connected());

        assert_eq!(a.unwrap().account(), b.unwrap().account());
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn rejection_is_shared_with_queued_callers() {
        let connector = MockConnector::rejecting();
        let (session, _) = session(connector.clone());

        let (a, b) = tokio::join!(session.ensure_connected(), session.ensure_connected());

        assert!(matches!(a, Err(AppError::ConnectionRejected(_))));
        assert!(matches!(b, Err(AppError::ConnectionRejected(_))));
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn later_call_after_rejection_prompts_again() {
        let connector = MockConnector::rejecting();
        let (session, _) = session(connector.clone());

        session.ensure_connected().await.unwrap_err();
        session.ensure_connected().await.unwrap_err();

        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn rejected_connect_leaves_session_disconnected() {
        let connector = MockConnector::rejecting();
        let (session, _) = session(connector.clone());

        let err = session.ensure_connected().await.unwrap_err();
        assert!(matches!(err, AppError::ConnectionRejected(_)));
        assert!(session.current().await.is_none());
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_a_new_connect() {
        let connector = MockConnector::new();
        let (session, _) = session(connector.clone());

        session.ensure_connected().await.unwrap();
        session.invalidate().await;
        assert!(session.current().await.is_none());
        session.ensure_connected().await.unwrap();

        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn execution_handle_validates_network_every_time() {
        let connector = MockConnector::new();
        connector.push_chain_id("0x1");
        connector.push_chain_id(SEPOLIA_HEX);
        let (session, notifier) = session(connector.clone());

        // First call sees Sepolia, second sees mainnet after a network switch.
        assert!(matches!(
            session.execution_handle(false).await,
            Ok(ExecutionHandle::Reader(_))
        ));
        assert!(matches!(
            session.execution_handle(true).await,
            Err(AppError::WrongNetwork { actual: 1, .. })
        ));
        assert_eq!(notifier.notices().len(), 1);
        assert_eq!(connector.connect_count(), 1);
    }
}
