use crate::host::ProcessHost;
use anyhow::Context;
use delivery_engine::control::handle_token_command;
use delivery_engine::{DeliveryEngine, HttpTransport};
use delivery_protocol::control::{ControlRequest, ControlResponse};
use delivery_protocol::framing::MAX_CONTROL_LINE_LENGTH;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;

/// Accepts control connections until `shutdown` fires.
pub(crate) async fn run_control_server<T>(
    listener: TcpListener,
    engine: DeliveryEngine<T, ProcessHost>,
    shutdown: CancellationToken,
) -> anyhow::Result<()>
where
    T: HttpTransport + 'static,
{
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("control server shutting down");
                break;
            }
            accept = listener.accept() => {
                let (stream, peer) = accept.context("failed to accept control connection")?;
                let engine = engine.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, engine).await {
                        tracing::warn!(peer = %peer, error = %err, "failed to handle control connection");
                    }
                });
            }
        }
    }
    Ok(())
}

async fn handle_connection<T>(
    stream: TcpStream,
    engine: DeliveryEngine<T, ProcessHost>,
) -> anyhow::Result<()>
where
    T: HttpTransport + 'static,
{
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_CONTROL_LINE_LENGTH));
    let Some(line) = framed.next().await else {
        return Ok(());
    };
    let line = line.context("failed to read request line")?;
    let response = match serde_json::from_str::<ControlRequest>(&line) {
        Ok(request) => handle_request(&engine, request).await,
        Err(err) => ControlResponse::Error {
            message: format!("invalid request: {err}"),
        },
    };
    let payload = serde_json::to_string(&response)?;
    framed.send(payload).await?;
    Ok(())
}

pub(crate) async fn handle_request<T>(
    engine: &DeliveryEngine<T, ProcessHost>,
    request: ControlRequest,
) -> ControlResponse
where
    T: HttpTransport + 'static,
{
    match request {
        ControlRequest::SetToken { caller, args } => ControlResponse::Reply {
            message: handle_token_command(engine, caller, &args).await,
        },
        ControlRequest::PlayerConnected {
            steam_id,
            ip_address,
        } => {
            if steam_id.trim().is_empty() {
                return ControlResponse::Error {
                    message: "steam_id must not be empty".to_string(),
                };
            }
            engine.host().players().connect(&steam_id, &ip_address);
            engine.record_player_join(&steam_id, &ip_address).await;
            ControlResponse::Ok
        }
        ControlRequest::PlayerDisconnected { steam_id } => {
            if !engine.host().players().disconnect(&steam_id) {
                tracing::debug!(steam_id = %steam_id, "disconnect for unknown player");
            }
            ControlResponse::Ok
        }
        ControlRequest::Status => ControlResponse::Status {
            snapshot: engine.status().await,
        },
    }
}
