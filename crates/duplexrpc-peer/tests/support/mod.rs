#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use duplexrpc_frame::memory;
use duplexrpc_peer::{
    BinaryStream, ConnectionConfig, PacketConnection, Result, RpcError, RpcMethod, RpcObject,
    RpcService, SerializedChannel, Transformer,
};

// Greeter: plain values, sub-services, failures.

#[async_trait]
pub trait Greeter: Send + Sync {
    async fn rpc(&self, greeting: String, name: String) -> Result<String>;

    async fn subservice(&self, prefix: String) -> Result<Arc<dyn Greeter>>;

    async fn slow(&self, millis: u64) -> Result<u64>;

    async fn fail(&self, message: String) -> Result<()>;

    async fn explode(&self) -> Result<()>;

    async fn close(&self) {}
}

static RPC: LazyLock<Arc<RpcMethod<dyn Greeter, (String, String), String>>> =
    LazyLock::new(|| {
        Arc::new(
            RpcMethod::new(
                "rpc",
                Transformer::encoded(),
                Transformer::encoded(),
                |svc: Arc<dyn Greeter>, (greeting, name): (String, String)| async move {
                    svc.rpc(greeting, name).await
                },
            )
            .expect("rpc endpoint"),
        )
    });

static SUBSERVICE: LazyLock<Arc<RpcMethod<dyn Greeter, String, Arc<dyn Greeter>>>> =
    LazyLock::new(|| {
        Arc::new(
            RpcMethod::new(
                "subservice",
                Transformer::encoded(),
                Transformer::<Arc<dyn Greeter>>::subservice(),
                |svc: Arc<dyn Greeter>, prefix: String| async move { svc.subservice(prefix).await },
            )
            .expect("subservice endpoint"),
        )
    });

static SLOW: LazyLock<Arc<RpcMethod<dyn Greeter, u64, u64>>> = LazyLock::new(|| {
    Arc::new(
        RpcMethod::new(
            "slow",
            Transformer::encoded(),
            Transformer::encoded(),
            |svc: Arc<dyn Greeter>, millis: u64| async move { svc.slow(millis).await },
        )
        .expect("slow endpoint"),
    )
});

static FAIL: LazyLock<Arc<RpcMethod<dyn Greeter, String, ()>>> = LazyLock::new(|| {
    Arc::new(
        RpcMethod::new(
            "fail",
            Transformer::encoded(),
            Transformer::<()>::unit(),
            |svc: Arc<dyn Greeter>, message: String| async move { svc.fail(message).await },
        )
        .expect("fail endpoint"),
    )
});

static EXPLODE: LazyLock<Arc<RpcMethod<dyn Greeter, (), ()>>> = LazyLock::new(|| {
    Arc::new(
        RpcMethod::new(
            "explode",
            Transformer::<()>::unit(),
            Transformer::<()>::unit(),
            |svc: Arc<dyn Greeter>, ()| async move { svc.explode().await },
        )
        .expect("explode endpoint"),
    )
});

static GREETER: LazyLock<RpcObject<dyn Greeter>> = LazyLock::new(|| {
    RpcObject::builder("Greeter")
        .endpoint(RPC.clone())
        .and_then(|b| b.endpoint(SUBSERVICE.clone()))
        .and_then(|b| b.endpoint(SLOW.clone()))
        .and_then(|b| b.endpoint(FAIL.clone()))
        .and_then(|b| b.endpoint(EXPLODE.clone()))
        .expect("greeter endpoints")
        .build()
});

#[async_trait]
impl RpcService for dyn Greeter {
    fn rpc_object() -> &'static RpcObject<Self> {
        &GREETER
    }

    fn create_stub(channel: Arc<dyn SerializedChannel>) -> Arc<Self> {
        Arc::new(GreeterStub { channel })
    }

    async fn close(&self) {
        Greeter::close(self).await;
    }
}

pub struct GreeterStub {
    channel: Arc<dyn SerializedChannel>,
}

#[async_trait]
impl Greeter for GreeterStub {
    async fn rpc(&self, greeting: String, name: String) -> Result<String> {
        RPC.call_remote(&*self.channel, (greeting, name)).await
    }

    async fn subservice(&self, prefix: String) -> Result<Arc<dyn Greeter>> {
        SUBSERVICE.call_remote(&*self.channel, prefix).await
    }

    async fn slow(&self, millis: u64) -> Result<u64> {
        SLOW.call_remote(&*self.channel, millis).await
    }

    async fn fail(&self, message: String) -> Result<()> {
        FAIL.call_remote(&*self.channel, message).await
    }

    async fn explode(&self) -> Result<()> {
        EXPLODE.call_remote(&*self.channel, ()).await
    }

    async fn close(&self) {
        let _ = self.channel.close().await;
    }
}

/// Greets with an optional prefix and counts how often it was closed.
pub struct PrefixGreeter {
    pub prefix: String,
    pub closes: Arc<AtomicUsize>,
}

impl PrefixGreeter {
    pub fn root(closes: Arc<AtomicUsize>) -> Arc<Self> {
        Arc::new(Self {
            prefix: String::new(),
            closes,
        })
    }
}

fn join_words(words: &[&str]) -> String {
    words
        .iter()
        .filter(|w| !w.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl Greeter for PrefixGreeter {
    async fn rpc(&self, greeting: String, name: String) -> Result<String> {
        Ok(join_words(&[&self.prefix, &greeting, &name]))
    }

    async fn subservice(&self, prefix: String) -> Result<Arc<dyn Greeter>> {
        Ok(Arc::new(PrefixGreeter {
            prefix: join_words(&[&self.prefix, &prefix]),
            closes: self.closes.clone(),
        }))
    }

    async fn slow(&self, millis: u64) -> Result<u64> {
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(millis)
    }

    async fn fail(&self, message: String) -> Result<()> {
        Err(RpcError::remote(message))
    }

    async fn explode(&self) -> Result<()> {
        panic!("greeter exploded")
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Makes one last remote call from its close and records the outcome.
#[derive(Default)]
pub struct FarewellGreeter {
    pub remote: OnceLock<Arc<dyn Greeter>>,
    pub farewell: OnceLock<Result<u64>>,
}

#[async_trait]
impl Greeter for FarewellGreeter {
    async fn rpc(&self, greeting: String, name: String) -> Result<String> {
        Ok(join_words(&[&greeting, &name]))
    }

    async fn subservice(&self, _prefix: String) -> Result<Arc<dyn Greeter>> {
        Err(RpcError::remote("no sub-services here"))
    }

    async fn slow(&self, millis: u64) -> Result<u64> {
        Ok(millis)
    }

    async fn fail(&self, message: String) -> Result<()> {
        Err(RpcError::remote(message))
    }

    async fn explode(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {
        let Some(remote) = self.remote.get() else {
            return;
        };
        let outcome = remote.slow(60_000).await;
        let _ = self.farewell.set(outcome);
    }
}

// Taker: live sub-services passed as call arguments.

#[async_trait]
pub trait Taker: Send + Sync {
    async fn take(&self, greeter: Arc<dyn Greeter>) -> Result<String>;
}

static TAKE: LazyLock<Arc<RpcMethod<dyn Taker, Arc<dyn Greeter>, String>>> =
    LazyLock::new(|| {
        Arc::new(
            RpcMethod::new(
                "take",
                Transformer::<Arc<dyn Greeter>>::subservice(),
                Transformer::encoded(),
                |svc: Arc<dyn Taker>, greeter: Arc<dyn Greeter>| async move {
                    svc.take(greeter).await
                },
            )
            .expect("take endpoint"),
        )
    });

static TAKER: LazyLock<RpcObject<dyn Taker>> = LazyLock::new(|| {
    RpcObject::builder("Taker")
        .endpoint(TAKE.clone())
        .expect("taker endpoints")
        .build()
});

impl RpcService for dyn Taker {
    fn rpc_object() -> &'static RpcObject<Self> {
        &TAKER
    }

    fn create_stub(channel: Arc<dyn SerializedChannel>) -> Arc<Self> {
        Arc::new(TakerStub { channel })
    }
}

struct TakerStub {
    channel: Arc<dyn SerializedChannel>,
}

#[async_trait]
impl Taker for TakerStub {
    async fn take(&self, greeter: Arc<dyn Greeter>) -> Result<String> {
        TAKE.call_remote(&*self.channel, greeter).await
    }
}

/// Greets through the greeter it is handed, then releases it.
pub struct GreetingTaker;

#[async_trait]
impl Taker for GreetingTaker {
    async fn take(&self, greeter: Arc<dyn Greeter>) -> Result<String> {
        let reply = greeter.rpc("Hello".into(), "world".into()).await;
        Greeter::close(&*greeter).await;
        reply
    }
}

// Countdown: re-entrant calls bouncing between both sides.

#[async_trait]
pub trait Countdown: Send + Sync {
    async fn count(&self, n: u32) -> Result<u32>;
}

static COUNT: LazyLock<Arc<RpcMethod<dyn Countdown, u32, u32>>> = LazyLock::new(|| {
    Arc::new(
        RpcMethod::new(
            "count",
            Transformer::encoded(),
            Transformer::encoded(),
            |svc: Arc<dyn Countdown>, n: u32| async move { svc.count(n).await },
        )
        .expect("count endpoint"),
    )
});

static COUNTDOWN: LazyLock<RpcObject<dyn Countdown>> = LazyLock::new(|| {
    RpcObject::builder("Countdown")
        .endpoint(COUNT.clone())
        .expect("countdown endpoints")
        .build()
});

impl RpcService for dyn Countdown {
    fn rpc_object() -> &'static RpcObject<Self> {
        &COUNTDOWN
    }

    fn create_stub(channel: Arc<dyn SerializedChannel>) -> Arc<Self> {
        Arc::new(CountdownStub { channel })
    }
}

struct CountdownStub {
    channel: Arc<dyn SerializedChannel>,
}

#[async_trait]
impl Countdown for CountdownStub {
    async fn count(&self, n: u32) -> Result<u32> {
        COUNT.call_remote(&*self.channel, n).await
    }
}

/// Counts down by asking the other side for `n - 1`.
#[derive(Default)]
pub struct Relay {
    pub remote: OnceLock<Arc<dyn Countdown>>,
}

#[async_trait]
impl Countdown for Relay {
    async fn count(&self, n: u32) -> Result<u32> {
        if n == 0 {
            return Ok(0);
        }
        let remote = self
            .remote
            .get()
            .cloned()
            .ok_or_else(|| RpcError::remote("relay is not wired"))?;
        Ok(remote.count(n - 1).await? + 1)
    }
}

// Blobs: binary arguments and results.

#[async_trait]
pub trait Blobs: Send + Sync {
    /// Length and byte sum of the uploaded data.
    async fn upload(&self, data: BinaryStream) -> Result<(u64, u64)>;

    async fn download(&self, size: u64) -> Result<BinaryStream>;
}

static UPLOAD: LazyLock<Arc<RpcMethod<dyn Blobs, BinaryStream, (u64, u64)>>> =
    LazyLock::new(|| {
        Arc::new(
            RpcMethod::new(
                "upload",
                Transformer::<BinaryStream>::binary(),
                Transformer::encoded(),
                |svc: Arc<dyn Blobs>, data: BinaryStream| async move { svc.upload(data).await },
            )
            .expect("upload endpoint"),
        )
    });

static DOWNLOAD: LazyLock<Arc<RpcMethod<dyn Blobs, u64, BinaryStream>>> = LazyLock::new(|| {
    Arc::new(
        RpcMethod::new(
            "download",
            Transformer::encoded(),
            Transformer::<BinaryStream>::binary(),
            |svc: Arc<dyn Blobs>, size: u64| async move { svc.download(size).await },
        )
        .expect("download endpoint"),
    )
});

static BLOBS: LazyLock<RpcObject<dyn Blobs>> = LazyLock::new(|| {
    RpcObject::builder("Blobs")
        .endpoint(UPLOAD.clone())
        .and_then(|b| b.endpoint(DOWNLOAD.clone()))
        .expect("blobs endpoints")
        .build()
});

impl RpcService for dyn Blobs {
    fn rpc_object() -> &'static RpcObject<Self> {
        &BLOBS
    }

    fn create_stub(channel: Arc<dyn SerializedChannel>) -> Arc<Self> {
        Arc::new(BlobsStub { channel })
    }
}

struct BlobsStub {
    channel: Arc<dyn SerializedChannel>,
}

#[async_trait]
impl Blobs for BlobsStub {
    async fn upload(&self, data: BinaryStream) -> Result<(u64, u64)> {
        UPLOAD.call_remote(&*self.channel, data).await
    }

    async fn download(&self, size: u64) -> Result<BinaryStream> {
        DOWNLOAD.call_remote(&*self.channel, size).await
    }
}

pub struct PatternBlobs;

#[async_trait]
impl Blobs for PatternBlobs {
    async fn upload(&self, data: BinaryStream) -> Result<(u64, u64)> {
        let bytes = data.read_to_end().await?;
        Ok(summarize(&bytes))
    }

    async fn download(&self, size: u64) -> Result<BinaryStream> {
        Ok(BinaryStream::from_bytes(pattern(size as usize)))
    }
}

/// Deterministic test payload of `len` bytes.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

pub fn summarize(bytes: &[u8]) -> (u64, u64) {
    (
        bytes.len() as u64,
        bytes.iter().map(|b| u64::from(*b)).sum(),
    )
}

// Connection pairs.

pub fn memory_pair() -> (PacketConnection, PacketConnection) {
    memory_pair_with(ConnectionConfig::default())
}

pub fn memory_pair_with(config: ConnectionConfig) -> (PacketConnection, PacketConnection) {
    let (a, b) = memory::pair();
    (
        PacketConnection::new(a, config.clone()),
        PacketConnection::new(b, config),
    )
}

/// A pair over an in-memory byte pipe, so every packet goes through the codec.
pub fn stream_pair(config: ConnectionConfig) -> (PacketConnection, PacketConnection) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    (
        PacketConnection::over_stream(a, config.clone()),
        PacketConnection::over_stream(b, config),
    )
}
