use duplexrpc_peer::{connect, CallData, ChannelClient, ConnectionConfig};
use tracing::debug;

use crate::cmd::{parse_duration, runtime, CallArgs};
use crate::exit::{io_error, rpc_error, CliError, CliResult, DATA_INVALID, SUCCESS, TIMEOUT};
use crate::output::{print_reply, OutputFormat, Reply};

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.conn.to_config()?;
    let timeout = parse_duration(&args.timeout)?;
    let argument = encoded_argument(args.json.as_deref())?;

    let reply = runtime()?.block_on(async {
        match tokio::time::timeout(timeout, call(&args, config, argument)).await {
            Ok(result) => result,
            Err(_) => Err(CliError::new(
                TIMEOUT,
                format!("call to '{}' timed out after {}", args.endpoint, args.timeout),
            )),
        }
    })?;

    print_reply(&args.endpoint, &args.channel, &reply, format);
    Ok(SUCCESS)
}

/// Validate `--json` and normalize it to compact form.
fn encoded_argument(json: Option<&str>) -> CliResult<String> {
    let Some(text) = json else {
        return Ok(String::new());
    };
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|err| CliError::new(DATA_INVALID, format!("invalid --json argument: {err}")))?;
    serde_json::to_string(&value)
        .map_err(|err| CliError::new(DATA_INVALID, format!("invalid --json argument: {err}")))
}

async fn call(args: &CallArgs, config: ConnectionConfig, argument: String) -> CliResult<Reply> {
    let connection = connect(&args.path, config)
        .await
        .map_err(|err| rpc_error("connect failed", err))?;
    debug!(endpoint = %args.endpoint, channel = %args.channel, "issuing call");

    let result = ChannelClient::call(
        &connection,
        &args.channel,
        &args.endpoint,
        CallData::encoded(argument),
    )
    .await;

    let reply = match result {
        Ok(CallData::Binary(stream)) => stream
            .read_to_end()
            .await
            .map(Reply::Binary)
            .map_err(|err| io_error("binary result failed", err)),
        Ok(data) => data
            .into_encoded()
            .map(Reply::Encoded)
            .map_err(|err| rpc_error("call failed", err)),
        Err(err) => Err(rpc_error("call failed", err)),
    };

    connection.close().await;
    reply
}
