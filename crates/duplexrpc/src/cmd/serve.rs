use std::sync::Arc;

use duplexrpc_peer::{ConnectionConfig, ConnectionListener, PacketConnection, ServiceHandle};
use tracing::{debug, info};

use crate::cmd::{runtime, ServeArgs};
use crate::demo::{Demo, DemoService};
use crate::exit::{io_error, rpc_error, CliResult, SUCCESS};

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let config = args.conn.to_config()?;
    runtime()?.block_on(serve(args, config))
}

async fn serve(args: ServeArgs, config: ConnectionConfig) -> CliResult<i32> {
    let listener = ConnectionListener::bind(&args.path)
        .map_err(|err| rpc_error("bind failed", err))?
        .with_config(config);
    info!(path = %listener.path().display(), "serving demo service");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut open: Vec<PacketConnection> = Vec::new();

    loop {
        let service = ServiceHandle::<dyn Demo>::erase(Arc::new(DemoService));
        let connection = tokio::select! {
            signal = &mut shutdown => {
                signal.map_err(|err| io_error("signal handler setup failed", err))?;
                info!("interrupted, shutting down");
                break;
            }
            accepted = listener.accept_serving(service) => {
                accepted.map_err(|err| rpc_error("accept failed", err))?
            }
        };

        if args.once {
            tokio::select! {
                _ = connection.closed() => debug!("connection finished"),
                signal = &mut shutdown => {
                    signal.map_err(|err| io_error("signal handler setup failed", err))?;
                    info!("interrupted, shutting down");
                    connection.close().await;
                }
            }
            return Ok(SUCCESS);
        }

        prune_finished(&mut open);
        open.push(connection);
    }

    for connection in open {
        connection.close().await;
    }
    Ok(SUCCESS)
}

/// Drop connections that have already shut down.
fn prune_finished(open: &mut Vec<PacketConnection>) {
    let before = open.len();
    open.retain(|conn| !conn.is_closed());
    if open.len() < before {
        debug!(finished = before - open.len(), live = open.len(), "pruned finished connections");
    }
}
