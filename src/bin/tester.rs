// src/bin/tester.rs

//! Manual protocol exerciser: connects to a running HM's client port,
//! sends INIT, PROCESS_CREATE, and a GROUP REGISTER, and logs the
//! responses. Grounded on `tester.c`: same message sequence, same
//! synthetic `pid`/`proc_type` constants, same default connect target.

use anyhow::{Context, Result, bail};
use futures::{SinkExt, StreamExt};
use hm::core::protocol::{ClientCodec, ClientMessage};
use hm::core::registry::SubsType;
use std::env;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

const DEFAULT_PORT: u16 = 4999;
const SYNTHETIC_PROC_TYPE: u32 = 0x7501_0001;
const SYNTHETIC_PID_BASE: u32 = 0x0000_0034;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let location_index = parse_args()?;
    let pid = SYNTHETIC_PID_BASE | (location_index << 31);

    let stream = TcpStream::connect(("127.0.0.1", DEFAULT_PORT))
        .await
        .context("connecting to HM client port")?;
    let mut framed = Framed::new(stream, ClientCodec);

    framed
        .send(ClientMessage::Init {
            msg_id: 1,
            index: location_index,
            group: location_index,
            keepalive_period_ms: 1000,
        })
        .await?;
    tracing::info!("INIT sent");
    match framed.next().await {
        Some(Ok(ClientMessage::InitResponse {
            response_ok,
            hardware_num,
            ..
        })) => {
            tracing::info!(response_ok, hardware_num, "INIT response received");
        }
        Some(Ok(other)) => tracing::warn!(?other, "unexpected response to INIT"),
        Some(Err(err)) => bail!("error reading INIT response: {err}"),
        None => bail!("connection closed before INIT response"),
    }

    framed
        .send(ClientMessage::ProcessCreate {
            msg_id: 2,
            pid,
            proc_type: SYNTHETIC_PROC_TYPE,
            name: "TEST".to_string(),
            interfaces: Vec::new(),
        })
        .await?;
    tracing::info!(pid, "PROCESS_CREATE sent");
    if let Some(Ok(ClientMessage::Ack { response_ok, .. })) = framed.next().await {
        tracing::info!(response_ok, "PROCESS_CREATE acked");
    }

    framed
        .send(ClientMessage::Register {
            msg_id: 3,
            sub_type: SubsType::Group,
            ids: vec![location_index],
        })
        .await?;
    tracing::info!(group = location_index, "REGISTER sent");
    if let Some(Ok(ClientMessage::Ack { response_ok, .. })) = framed.next().await {
        tracing::info!(response_ok, "REGISTER acked");
    }

    tracing::info!("exerciser done, holding connection open for notifications (Ctrl-C to exit)");
    loop {
        match framed.next().await {
            Some(Ok(msg)) => tracing::info!(?msg, "received"),
            Some(Err(err)) => {
                tracing::warn!(%err, "decode error");
                break;
            }
            None => break,
        }
    }
    Ok(())
}

fn parse_args() -> Result<u32> {
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        if args[i] == "-l" {
            i += 1;
            let raw = args.get(i).context("-l requires a location index")?;
            return raw.parse().context("location index must be a non-negative integer");
        }
        i += 1;
    }
    bail!("usage: hm-tester -l <location_index>")
}
