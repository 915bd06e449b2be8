use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::{
    error::{AppError, AppResult},
    implementations::{gateway::ContractGateway, tracker::TransactionTracker},
    types::{ConnectionState, PendingWrite, ReadOutcome, ReadStatus, SessionSnapshot},
    wallet::{ExecutionHandle, WalletConnector, WalletHandle, WalletSession},
};

/// Top-level orchestration of the "write sentence" and "read sentence" flows.
///
/// Errors never tear the session down: every flow catches at its boundary, logs,
/// resets its pending flag and hands the error back to the caller. The controller does
/// not serialize writes; front ends keep at most one write in flight.
pub struct SessionController<C: WalletConnector> {
    session: WalletSession<C>,
    gateway: ContractGateway,
    tracker: TransactionTracker,
    state: watch::Sender<SessionSnapshot>,
}

impl<C: WalletConnector> SessionController<C> {
    pub fn new(
        session: WalletSession<C>,
        gateway: ContractGateway,
        tracker: TransactionTracker,
        initial_input: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::new(initial_input));
        Self {
            session,
            gateway,
            tracker,
            state,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    pub fn set_input(&self, text: impl Into<String>) {
        let text = text.into();
        self.state.send_modify(|s| s.input = text);
    }

    /// Auto-connect on start: a disconnected session gets one connection attempt.
    pub async fn bootstrap(&self) {
        if self.snapshot().connection != ConnectionState::Disconnected {
            return;
        }
        if let Err(err) = self.connect_wallet().await {
            warn!("auto-connect failed: {err}");
        }
    }

    /// The wallet went away: drop the handle and schedule one reconnect attempt.
    pub async fn handle_disconnect(&self) {
        self.session.invalidate().await;
        self.state.send_modify(|s| {
            s.connection = ConnectionState::Disconnected;
            s.account = None;
        });
        info!("wallet disconnected");
        self.bootstrap().await;
    }

    /// Disconnected -> Connecting -> Connected, or back to Disconnected on failure.
    #[instrument(skip(self))]
    pub async fn connect_wallet(&self) -> AppResult<WalletHandle<C::Provider, C::Signer>> {
        if let Some(handle) = self.session.current().await {
            return Ok(handle);
        }

        self.set_connection(ConnectionState::Connecting);
        match self.session.ensure_connected().await {
            Ok(handle) => {
                let account = handle.account();
                self.state.send_modify(|s| {
                    s.connection = ConnectionState::Connected;
                    s.account = Some(account);
                });
                Ok(handle)
            }
            Err(err) => {
                self.set_connection(ConnectionState::Disconnected);
                Err(err)
            }
        }
    }

    /// Submit the current input and wait for it to be mined.
    ///
    /// `pending` is raised once the transaction is submitted and always lowered on return.
    #[instrument(skip(self))]
    pub async fn write_sentence(&self) -> AppResult<PendingWrite> {
        let sentence = self.state.borrow().input.clone();
        let result = self.run_write(&sentence).await;
        self.state.send_modify(|s| s.pending = false);

        if let Err(err) = &result {
            log_flow_error("write", err);
        }
        result
    }

    async fn run_write(&self, sentence: &str) -> AppResult<PendingWrite> {
        self.connect_wallet().await?;
        let ExecutionHandle::Writer(signer) = self.session.execution_handle(true).await? else {
            return Err(AppError::Internal("expected a signing handle".into()));
        };
        let mut pending = self.gateway.submit_write(signer.clone(), sentence).await?;

        let submitted = pending.clone();
        self.state.send_modify(|s| {
            s.pending = true;
            s.last_write = Some(submitted);
        });

        let confirmation = self
            .tracker
            .await_confirmation(signer.as_ref(), &mut pending)
            .await;

        let settled = pending.clone();
        self.state.send_modify(|s| s.last_write = Some(settled));

        confirmation.map(|_| pending)
    }

    /// Query the stored sentence. A reverting call keeps the previously stored value.
    #[instrument(skip(self))]
    pub async fn read_sentence(&self) -> AppResult<ReadOutcome> {
        self.state.send_modify(|s| s.pending_read = true);
        let result = self.run_read().await;

        self.state.send_modify(|s| {
            s.pending_read = false;
            match &result {
                Ok(ReadOutcome::Value { sentence }) => {
                    s.stored_value = Some(sentence.clone());
                    s.last_read = ReadStatus::Succeeded;
                }
                Ok(ReadOutcome::NoValue { reason }) => {
                    s.last_read = ReadStatus::Failed {
                        reason: reason.clone(),
                    };
                }
                Err(err) => {
                    s.last_read = ReadStatus::Failed {
                        reason: err.to_string(),
                    };
                }
            }
        });

        if let Err(err) = &result {
            log_flow_error("read", err);
        }
        result
    }

    async fn run_read(&self) -> AppResult<ReadOutcome> {
        self.connect_wallet().await?;
        let ExecutionHandle::Reader(provider) = self.session.execution_handle(false).await? else {
            return Err(AppError::Internal("expected a read-only handle".into()));
        };
        self.gateway.perform_read(provider).await
    }

    fn set_connection(&self, connection: ConnectionState) {
        self.state.send_if_modified(|s| {
            if s.connection == connection {
                return false;
            }
            info!(from = %s.connection, to = %connection, "connection state changed");
            s.connection = connection;
            true
        });
    }
}

fn log_flow_error(flow: &str, err: &AppError) {
    if err.is_user_visible() {
        warn!("{flow} flow aborted: {err}");
    } else {
        error!("{flow} flow failed: {err}");
    }
}
