//! Conversion between typed values and [`CallData`].

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::call_data::{BinaryStream, CallData};
use crate::channel::{ChannelId, SerializedChannel, TransformContext};
use crate::error::Result;
use crate::service::{HostedService, RpcService, ServiceHandle};

/// How one endpoint argument or result crosses the wire.
pub enum Transformer<V> {
    /// Value encoded as text by a pluggable codec.
    Encoded(EncodedTransformer<V>),
    /// Value streamed as chunked binary data.
    Binary(BinaryTransformer<V>),
    /// Live service reference, passed as a channel id.
    Subservice(SubserviceTransformer<V>),
}

pub struct EncodedTransformer<V> {
    encode: fn(&V) -> Result<String>,
    decode: fn(&str) -> Result<V>,
    has_content: bool,
}

pub struct BinaryTransformer<V> {
    into_stream: fn(V) -> BinaryStream,
    from_stream: fn(BinaryStream) -> V,
}

pub struct SubserviceTransformer<V> {
    host: fn(V) -> Arc<dyn HostedService>,
    stub: fn(Arc<dyn SerializedChannel>) -> V,
}

impl<V: Serialize + DeserializeOwned> Transformer<V> {
    /// JSON encoding via serde.
    pub fn encoded() -> Self {
        Self::Encoded(EncodedTransformer {
            encode: encode_json::<V>,
            decode: decode_json::<V>,
            has_content: true,
        })
    }
}

impl<V> Transformer<V> {
    /// Text encoding with a caller-supplied codec.
    pub fn encoded_with(encode: fn(&V) -> Result<String>, decode: fn(&str) -> Result<V>) -> Self {
        Self::Encoded(EncodedTransformer {
            encode,
            decode,
            has_content: true,
        })
    }

    /// False for marker values that carry nothing.
    ///
    /// Such values are never decoded: `untransform` only re-raises an error
    /// payload and otherwise ignores whatever the peer sent.
    pub fn has_content(&self) -> bool {
        match self {
            Self::Encoded(encoded) => encoded.has_content,
            Self::Binary(_) | Self::Subservice(_) => true,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    pub fn transform(&self, value: V, ctx: &TransformContext) -> Result<CallData> {
        match self {
            Self::Encoded(encoded) => Ok(CallData::Encoded((encoded.encode)(&value)?)),
            Self::Binary(binary) => Ok(CallData::Binary((binary.into_stream)(value))),
            Self::Subservice(sub) => {
                let id = ctx.host()?.register_host((sub.host)(value));
                Ok(CallData::Encoded(serde_json::to_string(&id)?))
            }
        }
    }

    pub fn untransform(&self, data: CallData, ctx: &TransformContext) -> Result<V> {
        match self {
            Self::Encoded(encoded) if !encoded.has_content => match data {
                CallData::Error(payload) => Err(payload.into()),
                _ => (encoded.decode)(""),
            },
            Self::Encoded(encoded) => (encoded.decode)(&data.into_encoded()?),
            Self::Binary(binary) => Ok((binary.from_stream)(data.into_binary()?)),
            Self::Subservice(sub) => {
                let id: ChannelId = serde_json::from_str(&data.into_encoded()?)?;
                let channel = ctx.client()?.clone().wrap_channel(id);
                Ok((sub.stub)(channel))
            }
        }
    }
}

impl Transformer<()> {
    /// The no-content marker.
    pub fn unit() -> Self {
        Self::Encoded(EncodedTransformer {
            encode: |_| Ok(String::new()),
            decode: |_| Ok(()),
            has_content: false,
        })
    }
}

impl Transformer<BinaryStream> {
    pub fn binary() -> Self {
        Self::Binary(BinaryTransformer {
            into_stream: |stream| stream,
            from_stream: |stream| stream,
        })
    }
}

impl<T: RpcService + ?Sized> Transformer<Arc<T>> {
    pub fn subservice() -> Self {
        Self::Subservice(SubserviceTransformer {
            host: ServiceHandle::<T>::erase,
            stub: T::create_stub,
        })
    }
}

fn encode_json<V: Serialize>(value: &V) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn decode_json<V: DeserializeOwned>(text: &str) -> Result<V> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_data::ErrorPayload;
    use crate::error::RpcError;

    #[test]
    fn encoded_roundtrip_uses_json() {
        let transformer = Transformer::<(String, String)>::encoded();
        let ctx = TransformContext::default();
        let data = transformer
            .transform(("Hello".into(), "world".into()), &ctx)
            .unwrap();
        assert!(matches!(&data, CallData::Encoded(text) if text == r#"["Hello","world"]"#));

        let value = transformer.untransform(data, &ctx).unwrap();
        assert_eq!(value, ("Hello".to_string(), "world".to_string()));
    }

    #[test]
    fn unit_has_no_content() {
        let transformer = Transformer::<()>::unit();
        assert!(!transformer.has_content());
        assert!(Transformer::<u32>::encoded().has_content());

        let data = transformer
            .transform((), &TransformContext::default())
            .unwrap();
        assert!(matches!(&data, CallData::Encoded(text) if text.is_empty()));
    }

    #[test]
    fn no_content_ignores_body_but_not_errors() {
        let transformer = Transformer::<()>::unit();
        let ctx = TransformContext::default();

        transformer
            .untransform(CallData::encoded("null"), &ctx)
            .unwrap();
        transformer
            .untransform(CallData::Binary(BinaryStream::empty()), &ctx)
            .unwrap();

        let failure = CallData::Error(ErrorPayload::Remote {
            message: "nope".into(),
        });
        assert!(matches!(
            transformer.untransform(failure, &ctx),
            Err(RpcError::Remote(_))
        ));
    }

    #[test]
    fn custom_codec() {
        let transformer = Transformer::<u16>::encoded_with(
            |value| Ok(format!("{value:x}")),
            |text| u16::from_str_radix(text, 16).map_err(RpcError::remote),
        );
        let ctx = TransformContext::default();
        let data = transformer.transform(255, &ctx).unwrap();
        assert!(matches!(&data, CallData::Encoded(text) if text == "ff"));
        assert_eq!(transformer.untransform(data, &ctx).unwrap(), 255);
    }

    #[test]
    fn every_variant_raises_error_payloads() {
        let ctx = TransformContext::default();
        let failure = || {
            CallData::Error(ErrorPayload::Remote {
                message: "nope".into(),
            })
        };

        let encoded = Transformer::<u32>::encoded().untransform(failure(), &ctx);
        assert!(matches!(encoded, Err(RpcError::Remote(_))));

        let binary = Transformer::<BinaryStream>::binary().untransform(failure(), &ctx);
        assert!(matches!(binary, Err(RpcError::Remote(_))));
    }

    #[tokio::test]
    async fn binary_passes_stream_through() {
        let transformer = Transformer::<BinaryStream>::binary();
        assert!(transformer.is_binary());
        let ctx = TransformContext::default();
        let data = transformer
            .transform(BinaryStream::from_bytes(&b"raw"[..]), &ctx)
            .unwrap();
        let stream = transformer.untransform(data, &ctx).unwrap();
        assert_eq!(stream.read_to_end().await.unwrap(), b"raw");
    }
}
