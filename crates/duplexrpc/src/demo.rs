//! Demo service hosted by `duplexrpc serve`.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use duplexrpc_peer::{
    BinaryStream, Result, RpcMethod, RpcObject, RpcService, SerializedChannel, Transformer,
};
use serde_json::Value;
use tracing::debug;

#[async_trait]
pub trait Demo: Send + Sync {
    /// Return the argument unchanged.
    async fn echo(&self, value: Value) -> Result<Value>;

    /// Join the words with single spaces.
    async fn join(&self, words: Vec<String>) -> Result<String>;

    /// Stream the UTF-8 bytes of `text` back in reverse order.
    async fn reverse_bytes(&self, text: String) -> Result<BinaryStream>;

    /// A fresh counter starting at `start`, returned as a live service.
    async fn counter(&self, start: i64) -> Result<Arc<dyn Counter>>;
}

#[async_trait]
pub trait Counter: Send + Sync {
    async fn increment(&self, by: i64) -> Result<i64>;

    async fn get(&self) -> Result<i64>;

    async fn close(&self) {}
}

static ECHO: LazyLock<Arc<RpcMethod<dyn Demo, Value, Value>>> = LazyLock::new(|| {
    Arc::new(
        RpcMethod::new(
            "echo",
            Transformer::encoded(),
            Transformer::encoded(),
            |svc: Arc<dyn Demo>, value: Value| async move { svc.echo(value).await },
        )
        .expect("echo endpoint"),
    )
});

static JOIN: LazyLock<Arc<RpcMethod<dyn Demo, Vec<String>, String>>> = LazyLock::new(|| {
    Arc::new(
        RpcMethod::new(
            "join",
            Transformer::encoded(),
            Transformer::encoded(),
            |svc: Arc<dyn Demo>, words: Vec<String>| async move { svc.join(words).await },
        )
        .expect("join endpoint"),
    )
});

static REVERSE_BYTES: LazyLock<Arc<RpcMethod<dyn Demo, String, BinaryStream>>> =
    LazyLock::new(|| {
        Arc::new(
            RpcMethod::new(
                "reverse_bytes",
                Transformer::encoded(),
                Transformer::<BinaryStream>::binary(),
                |svc: Arc<dyn Demo>, text: String| async move { svc.reverse_bytes(text).await },
            )
            .expect("reverse_bytes endpoint"),
        )
    });

static COUNTER: LazyLock<Arc<RpcMethod<dyn Demo, i64, Arc<dyn Counter>>>> =
    LazyLock::new(|| {
        Arc::new(
            RpcMethod::new(
                "counter",
                Transformer::encoded(),
                Transformer::<Arc<dyn Counter>>::subservice(),
                |svc: Arc<dyn Demo>, start: i64| async move { svc.counter(start).await },
            )
            .expect("counter endpoint"),
        )
    });

static DEMO: LazyLock<RpcObject<dyn Demo>> = LazyLock::new(|| {
    RpcObject::builder("Demo")
        .endpoint(ECHO.clone())
        .and_then(|b| b.endpoint(JOIN.clone()))
        .and_then(|b| b.endpoint(REVERSE_BYTES.clone()))
        .and_then(|b| b.endpoint(COUNTER.clone()))
        .expect("demo endpoints")
        .build()
});

impl RpcService for dyn Demo {
    fn rpc_object() -> &'static RpcObject<Self> {
        &DEMO
    }

    fn create_stub(channel: Arc<dyn SerializedChannel>) -> Arc<Self> {
        Arc::new(DemoStub { channel })
    }
}

struct DemoStub {
    channel: Arc<dyn SerializedChannel>,
}

#[async_trait]
impl Demo for DemoStub {
    async fn echo(&self, value: Value) -> Result<Value> {
        ECHO.call_remote(&*self.channel, value).await
    }

    async fn join(&self, words: Vec<String>) -> Result<String> {
        JOIN.call_remote(&*self.channel, words).await
    }

    async fn reverse_bytes(&self, text: String) -> Result<BinaryStream> {
        REVERSE_BYTES.call_remote(&*self.channel, text).await
    }

    async fn counter(&self, start: i64) -> Result<Arc<dyn Counter>> {
        COUNTER.call_remote(&*self.channel, start).await
    }
}

static INCREMENT: LazyLock<Arc<RpcMethod<dyn Counter, i64, i64>>> = LazyLock::new(|| {
    Arc::new(
        RpcMethod::new(
            "increment",
            Transformer::encoded(),
            Transformer::encoded(),
            |svc: Arc<dyn Counter>, by: i64| async move { svc.increment(by).await },
        )
        .expect("increment endpoint"),
    )
});

static GET: LazyLock<Arc<RpcMethod<dyn Counter, (), i64>>> = LazyLock::new(|| {
    Arc::new(
        RpcMethod::new(
            "get",
            Transformer::<()>::unit(),
            Transformer::encoded(),
            |svc: Arc<dyn Counter>, ()| async move { svc.get().await },
        )
        .expect("get endpoint"),
    )
});

static COUNTER_OBJECT: LazyLock<RpcObject<dyn Counter>> = LazyLock::new(|| {
    RpcObject::builder("Counter")
        .endpoint(INCREMENT.clone())
        .and_then(|b| b.endpoint(GET.clone()))
        .expect("counter endpoints")
        .build()
});

#[async_trait]
impl RpcService for dyn Counter {
    fn rpc_object() -> &'static RpcObject<Self> {
        &COUNTER_OBJECT
    }

    fn create_stub(channel: Arc<dyn SerializedChannel>) -> Arc<Self> {
        Arc::new(CounterStub { channel })
    }

    async fn close(&self) {
        Counter::close(self).await;
    }
}

struct CounterStub {
    channel: Arc<dyn SerializedChannel>,
}

#[async_trait]
impl Counter for CounterStub {
    async fn increment(&self, by: i64) -> Result<i64> {
        INCREMENT.call_remote(&*self.channel, by).await
    }

    async fn get(&self) -> Result<i64> {
        GET.call_remote(&*self.channel, ()).await
    }

    async fn close(&self) {
        let _ = self.channel.close().await;
    }
}

/// Server-side implementation of [`Demo`].
pub struct DemoService;

#[async_trait]
impl Demo for DemoService {
    async fn echo(&self, value: Value) -> Result<Value> {
        Ok(value)
    }

    async fn join(&self, words: Vec<String>) -> Result<String> {
        Ok(words.join(" "))
    }

    async fn reverse_bytes(&self, text: String) -> Result<BinaryStream> {
        let mut bytes = text.into_bytes();
        bytes.reverse();
        Ok(BinaryStream::from_bytes(bytes))
    }

    async fn counter(&self, start: i64) -> Result<Arc<dyn Counter>> {
        Ok(Arc::new(LocalCounter {
            value: AtomicI64::new(start),
        }))
    }
}

struct LocalCounter {
    value: AtomicI64,
}

#[async_trait]
impl Counter for LocalCounter {
    async fn increment(&self, by: i64) -> Result<i64> {
        Ok(self.value.fetch_add(by, Ordering::SeqCst) + by)
    }

    async fn get(&self) -> Result<i64> {
        Ok(self.value.load(Ordering::SeqCst))
    }

    async fn close(&self) {
        debug!(value = self.value.load(Ordering::SeqCst), "counter released");
    }
}
