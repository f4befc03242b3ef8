use log::{error, info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use vps_gateway::error::{CommandError, GatewayError};

#[derive(Deserialize)]
struct Request {
    #[serde(default)]
    id: Value,
    command: String,
    #[serde(default)]
    params: Value,
}

fn error_line(id: Value, err: CommandError) -> Value {
    json!({ "id": id, "error": err })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let data_dir = vps_gateway::default_data_dir();
    let dispatcher = Arc::new(vps_gateway::init(&data_dir).await.map_err(|e| {
        error!("Failed to start gateway: {}", e);
        anyhow::anyhow!(e)
    })?);
    info!("Gateway ready, reading commands from stdin");

    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            let mut bytes = line.to_string().into_bytes();
            bytes.push(b'\n');
            if let Err(e) = stdout.write_all(&bytes).await {
                error!("Failed to write response: {}", e);
                break;
            }
            if let Err(e) = stdout.flush().await {
                error!("Failed to flush response: {}", e);
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!("Malformed request: {}", e);
                let err = CommandError::from(GatewayError::InvalidParams(e.to_string()));
                // the receiver only goes away when stdout is closed
                let _ = tx.send(error_line(Value::Null, err));
                continue;
            }
        };

        let dispatcher = dispatcher.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let response = match dispatcher.dispatch(&request.command, request.params).await {
                Ok(value) => json!({ "id": request.id, "ok": value }),
                Err(err) => error_line(request.id, err),
            };
            let _ = tx.send(response);
        });
    }

    info!("stdin closed, shutting down");
    dispatcher.state().pollers.stop_all();
    dispatcher.state().connections.disconnect().await;
    drop(tx);
    let _ = writer.await;
    Ok(())
}
