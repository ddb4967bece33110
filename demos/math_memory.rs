use packet_rpc::{ConnectionBuilder, Packet, PacketBody, Result, TransportBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum Math {
    Add { a: i32, b: i32 },
    Sum { sum: i32 },
    Tick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum MathKind {
    Add,
    Sum,
    Tick,
}

impl PacketBody for Math {
    type Kind = MathKind;

    fn kind(&self) -> MathKind {
        match self {
            Math::Add { .. } => MathKind::Add,
            Math::Sum { .. } => MathKind::Sum,
            Math::Tick => MathKind::Tick,
        }
    }

    fn channel_name(&self) -> &str {
        match self {
            Math::Add { .. } | Math::Sum { .. } => "math",
            Math::Tick => "ticks",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let transport = |node: &str| {
        TransportBuilder::new()
            .uri("memory://")
            .node_id(node)
            .build()
    };

    let server = ConnectionBuilder::new(transport("math").await?)
        .handler(MathKind::Add, |request: &Packet<Math>| match request.body() {
            Math::Add { a, b } => Some(Math::Sum { sum: a + b }),
            _ => None,
        })
        .handler(MathKind::Tick, |_: &Packet<Math>| {
            println!("server: tick");
            None
        })
        .subscribe("math")
        .subscribe("ticks")
        .build()
        .await?;

    let client = ConnectionBuilder::new(transport("Roxy").await?)
        .build()
        .await?;

    client
        .publish(Math::Tick, Duration::from_secs(1))
        .await
        .into_result()?;

    let reply = client
        .request(Math::Add { a: 20, b: 3 }, Duration::from_secs(1))
        .await?;

    match reply.map(Packet::into_body) {
        Some(Math::Sum { sum }) => println!("20 + 3 = {sum}"),
        other => println!("unexpected reply: {other:?}"),
    }

    // Nobody answers on "ticks": the request times out with no value.
    let silent = client
        .request(Math::Tick, Duration::from_millis(200))
        .await?;
    println!("tick request answered: {}", silent.is_some());

    client.close().await.into_result()?;
    server.close().await.into_result()?;
    Ok(())
}
