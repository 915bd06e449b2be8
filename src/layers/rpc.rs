use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter},
    sync::{mpsc, oneshot},
    task::{JoinError, JoinSet},
};
use tracing::{error, warn};

use crate::{
    error::{AppError, AppResult},
    layers::session::SessionController,
    notify::Notifier,
    types::{
        ConnectOut, ReadOut, SessionSnapshot, SetInputParams, WriteOut, WriteSentenceParams,
    },
    wallet::WalletConnector,
};

const WRITE_IN_FLIGHT: i32 = -32055;

/// Sink for everything written to stdout: responses and `notice` notifications.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<Value>,
}

impl Outbound {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send<T: Serialize>(&self, message: &T) {
        match serde_json::to_value(message) {
            Ok(value) => {
                if self.tx.send(value).is_err() {
                    warn!("stdout writer is gone, dropping message");
                }
            }
            Err(err) => error!("failed to serialize outbound message: {err}"),
        }
    }
}

impl Notifier for Outbound {
    fn notify(&self, message: &str) {
        warn!("notice: {message}");
        self.send(&RpcNotification::notice(message));
    }
}

/// Runtime that speaks JSON-RPC 2.0 over stdin/stdout on behalf of a front end.
pub struct RpcServer<C: WalletConnector + 'static> {
    dispatcher: Dispatcher<C>,
    outbound: Outbound,
    outbound_rx: mpsc::UnboundedReceiver<Value>,
}

impl<C: WalletConnector + 'static> RpcServer<C> {
    pub fn new(
        controller: Arc<SessionController<C>>,
        outbound: Outbound,
        outbound_rx: mpsc::UnboundedReceiver<Value>,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(controller),
            outbound,
            outbound_rx,
        }
    }

    /// Process requests until EOF on stdin. Each request runs in its own task so a read
    /// is never stuck behind a write waiting for confirmation.
    pub async fn run_stdio(self) -> AppResult<()> {
        let Self {
            dispatcher,
            outbound,
            mut outbound_rx,
        } = self;

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let writer_task = tokio::spawn(async move {
            let mut writer = BufWriter::new(io::stdout());
            loop {
                tokio::select! {
                    Some(message) = outbound_rx.recv() => write_line(&mut writer, &message).await?,
                    _ = &mut shutdown_rx => break,
                }
            }
            while let Ok(message) = outbound_rx.try_recv() {
                write_line(&mut writer, &message).await?;
            }
            Ok::<(), AppError>(())
        });

        let mut reader = BufReader::new(io::stdin());
        let mut line = String::new();
        let mut in_flight = JoinSet::new();

        loop {
            reap_finished(&mut in_flight);
            line.clear();
            let bytes = reader.read_line(&mut line).await?;
            if bytes == 0 {
                break;
            }

            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<RpcRequest>(&line) {
                Ok(req) => {
                    let dispatcher = dispatcher.clone();
                    let outbound = outbound.clone();
                    in_flight.spawn(async move {
                        let response = dispatcher.handle_request(req).await;
                        outbound.send(&response);
                    });
                }
                Err(err) => {
                    warn!("failed to parse JSON-RPC request: {err}");
                    outbound.send(&RpcResponse::error(
                        Value::Null,
                        -32700,
                        format!("parse error: {err}"),
                    ));
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            log_task_failure(joined);
        }

        let _ = shutdown_tx.send(());
        writer_task
            .await
            .map_err(|err| AppError::Internal(format!("stdout writer failed: {err}")))?
    }
}

/// Drop finished request tasks so a long session does not accumulate them.
fn reap_finished(in_flight: &mut JoinSet<()>) -> usize {
    let mut reaped = 0;
    while let Some(joined) = in_flight.try_join_next() {
        log_task_failure(joined);
        reaped += 1;
    }
    reaped
}

fn log_task_failure(joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        error!("request task failed: {err}");
    }
}

async fn write_line<W>(writer: &mut W, message: &Value) -> AppResult<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(message)?;
    writer.write_all(&payload).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Maps method names onto controller actions.
struct Dispatcher<C: WalletConnector> {
    controller: Arc<SessionController<C>>,
    write_in_flight: Arc<AtomicBool>,
}

impl<C: WalletConnector> Clone for Dispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            controller: self.controller.clone(),
            write_in_flight: self.write_in_flight.clone(),
        }
    }
}

impl<C: WalletConnector> Dispatcher<C> {
    fn new(controller: Arc<SessionController<C>>) -> Self {
        Self {
            controller,
            write_in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn handle_request(&self, req: RpcRequest) -> RpcResponse {
        let RpcRequest {
            method, params, id, ..
        } = req;

        match method.as_str() {
            "connect" => {
                self.dispatch::<NoParams, ConnectOut, _, _>(id, params, |controller, _| async move {
                    let handle = controller.connect_wallet().await?;
                    Ok::<_, AppError>(ConnectOut {
                        connected: true,
                        account: format!("{:#x}", handle.account()),
                    })
                })
                .await
            }
            "disconnect" => {
                self.dispatch::<NoParams, SessionSnapshot, _, _>(id, params, |controller, _| async move {
                    controller.handle_disconnect().await;
                    Ok(controller.snapshot())
                })
                .await
            }
            "set_input" => {
                self.dispatch::<SetInputParams, SessionSnapshot, _, _>(
                    id,
                    params,
                    |controller, parsed| async move {
                        controller.set_input(parsed.text);
                        Ok(controller.snapshot())
                    },
                )
                .await
            }
            "write_sentence" => self.write_sentence(id, params).await,
            "read_sentence" => {
                self.dispatch::<NoParams, ReadOut, _, _>(id, params, |controller, _| async move {
                    let outcome = controller.read_sentence().await?;
                    Ok::<_, AppError>(ReadOut {
                        outcome,
                        stored_value: controller.snapshot().stored_value,
                    })
                })
                .await
            }
            "state" => {
                self.dispatch::<NoParams, SessionSnapshot, _, _>(id, params, |controller, _| async move {
                    Ok(controller.snapshot())
                })
                .await
            }
            other => {
                warn!("received unknown method {other}");
                RpcResponse::error(id, -32601, format!("method not found: {other}"))
            }
        }
    }

    /// The submit affordance stays disabled while a write is in flight.
    async fn write_sentence(&self, id: Value, params: Value) -> RpcResponse {
        if self.write_in_flight.swap(true, Ordering::SeqCst) {
            return RpcResponse::error(
                id,
                WRITE_IN_FLIGHT,
                "a sentence write is already pending".into(),
            );
        }

        let response = self
            .dispatch::<WriteSentenceParams, WriteOut, _, _>(id, params, |controller, parsed| async move {
                if let Some(sentence) = parsed.sentence {
                    controller.set_input(sentence);
                }
                let write = controller.write_sentence().await?;
                Ok::<_, AppError>(WriteOut {
                    tx_hash: format!("{:#x}", write.tx_hash),
                    status: write.status,
                })
            })
            .await;

        self.write_in_flight.store(false, Ordering::SeqCst);
        response
    }

    async fn dispatch<P, T, F, Fut>(
        &self,
        id: Value,
        params_value: Value,
        handler: F,
    ) -> RpcResponse
    where
        P: DeserializeOwned,
        T: Serialize,
        F: Fn(Arc<SessionController<C>>, P) -> Fut,
        Fut: std::future::Future<Output = AppResult<T>>,
    {
        match parse_params::<P>(params_value) {
            Ok(parsed) => match handler(self.controller.clone(), parsed).await {
                Ok(result) => match serde_json::to_value(result) {
                    Ok(value) => RpcResponse::success(id, value),
                    Err(err) => {
                        error!("serialization error: {err}");
                        RpcResponse::error(id, -32603, format!("serialization error: {err}"))
                    }
                },
                Err(err) => {
                    let payload = err.to_json_rpc();
                    RpcResponse::error_with_data(id, payload.code, payload.message, payload.data)
                }
            },
            Err(err) => {
                warn!("invalid params: {err}");
                RpcResponse::error(id, -32602, err.to_string())
            }
        }
    }
}

fn parse_params<T: DeserializeOwned>(value: Value) -> Result<T, AppError> {
    // Methods without arguments accept a missing `params` member.
    let value = if value.is_null() { json!({}) } else { value };
    serde_json::from_value(value)
        .map_err(|err| AppError::InvalidInput(format!("invalid params: {err}")))
}

fn default_null() -> Value {
    Value::Null
}

#[derive(Debug, Deserialize)]
struct NoParams {}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    #[allow(dead_code)]
    jsonrpc: String,
    method: String,
    #[serde(default = "default_null")]
    params: Value,
    #[serde(default = "default_null")]
    id: Value,
}

#[derive(Debug, Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
    id: Value,
}

impl RpcResponse {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    fn error(id: Value, code: i32, message: String) -> Self {
        Self::error_with_data(id, code, message, json!({}))
    }

    fn error_with_data(id: Value, code: i32, message: String, data: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(RpcError {
                code,
                message,
                data,
            }),
            id,
        }
    }
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i32,
    message: String,
    data: Value,
}

#[derive(Debug, Serialize)]
struct RpcNotification {
    jsonrpc: &'static str,
    method: &'static str,
    params: Value,
}

impl RpcNotification {
    fn notice(message: &str) -> Self {
        Self {
            jsonrpc: "2.0",
            method: "notice",
            params: json!({ "message": message }),
        }
    }
}
