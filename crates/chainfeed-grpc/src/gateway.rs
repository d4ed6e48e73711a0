//! The gateway RPC surface and its tonic implementation.

use std::str::FromStr;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde_json::{json, Value};
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::{Ascii, MetadataMap, MetadataValue};
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};

use chainfeed_core::config::{client_version, Config};
use chainfeed_core::error::{ConfigError, HandlerError, TransportError};
use chainfeed_core::feed::Feed;
use chainfeed_core::handler::HandlerKind;

use crate::proto::{BlocksReply, BlocksRequest, BlxrTxReply, BlxrTxRequest, TxsReply, TxsRequest};

/// Unary method accepted by [`GatewayApi::call`].
pub const BLXR_TX: &str = "blxr_tx";

/// Feeds the gateway streams over gRPC.
pub const STREAMED_FEEDS: [Feed; 4] = [
    Feed::NEW_TXS,
    Feed::PENDING_TXS,
    Feed::NEW_BLOCKS,
    Feed::BDN_BLOCKS,
];

const NEW_TXS_PATH: &str = "/gateway.Gateway/NewTxs";
const PENDING_TXS_PATH: &str = "/gateway.Gateway/PendingTxs";
const NEW_BLOCKS_PATH: &str = "/gateway.Gateway/NewBlocks";
const BDN_BLOCKS_PATH: &str = "/gateway.Gateway/BdnBlocks";
const BLXR_TX_PATH: &str = "/gateway.Gateway/BlxrTx";

/// Frames of one feed stream, each already split into notification payloads.
pub type FrameStream = BoxStream<'static, Result<Vec<Value>, Status>>;

/// One server stream per feed, one unary call per request.
///
/// # Thread Safety
/// Implementations are shared by every feed task of a handler.
#[async_trait]
pub trait GatewayApi: Send + Sync + 'static {
    /// Open the server stream for `feed`. Unknown feeds fail with
    /// `Code::Unimplemented`.
    async fn open_feed(&self, feed: &Feed, params: &Value) -> Result<FrameStream, Status>;

    /// Make a unary call. Unknown methods fail with `Code::Unimplemented`.
    async fn call(&self, method: &str, params: &Value) -> Result<Value, Status>;
}

/// [`GatewayApi`] over a tonic channel. Every call carries the
/// authorization, network and client version metadata.
#[derive(Clone)]
pub struct TonicGateway {
    grpc: tonic::client::Grpc<Channel>,
    metadata: MetadataMap,
}

impl TonicGateway {
    /// Dial the gRPC gateway configured in `config`.
    pub async fn connect(config: &Config) -> Result<Self, HandlerError> {
        let (kind, url) = config.endpoint()?;
        if kind != HandlerKind::GatewayGrpc {
            return Err(HandlerError::Unsupported(format!(
                "a {kind} endpoint on the gRPC handler"
            )));
        }
        let uri = if url.contains("://") {
            url.to_string()
        } else {
            format!("http://{url}")
        };
        let invalid = |reason: String| ConfigError::InvalidUrl {
            url: url.to_string(),
            reason,
        };
        let endpoint = Endpoint::from_shared(uri)
            .map_err(|e| invalid(e.to_string()))?
            .connect_timeout(config.timeouts.grpc_dial);
        let channel = endpoint.connect().await.map_err(|e| TransportError::Dial {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        tracing::info!(url, "connected");

        Ok(Self {
            grpc: tonic::client::Grpc::new(channel),
            metadata: call_metadata(config)?,
        })
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        *request.metadata_mut() = self.metadata.clone();
        request
    }

    async fn ready(&self) -> Result<tonic::client::Grpc<Channel>, Status> {
        let mut grpc = self.grpc.clone();
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("gateway not ready: {e}")))?;
        Ok(grpc)
    }

    async fn stream<Req, Resp>(
        &self,
        path: &'static str,
        message: Req,
    ) -> Result<tonic::Streaming<Resp>, Status>
    where
        Req: prost::Message + 'static,
        Resp: prost::Message + Default + 'static,
    {
        let mut grpc = self.ready().await?;
        let codec = ProstCodec::<Req, Resp>::default();
        let response = grpc
            .server_streaming(self.request(message), PathAndQuery::from_static(path), codec)
            .await?;
        Ok(response.into_inner())
    }

    async fn txs(&self, path: &'static str, params: &Value) -> Result<FrameStream, Status> {
        let request = TxsRequest::from_params(params).map_err(invalid_params)?;
        let stream = self.stream::<TxsRequest, TxsReply>(path, request).await?;
        Ok(stream
            .map(|frame| frame.map(TxsReply::into_notifications))
            .boxed())
    }

    async fn blocks(&self, path: &'static str, params: &Value) -> Result<FrameStream, Status> {
        let request = BlocksRequest::from_params(params).map_err(invalid_params)?;
        let stream = self.stream::<BlocksRequest, BlocksReply>(path, request).await?;
        Ok(stream
            .map(|frame| frame.map(|block| vec![block.into_notification()]))
            .boxed())
    }
}

#[async_trait]
impl GatewayApi for TonicGateway {
    async fn open_feed(&self, feed: &Feed, params: &Value) -> Result<FrameStream, Status> {
        match feed.as_str() {
            "newTxs" => self.txs(NEW_TXS_PATH, params).await,
            "pendingTxs" => self.txs(PENDING_TXS_PATH, params).await,
            "newBlocks" => self.blocks(NEW_BLOCKS_PATH, params).await,
            "bdnBlocks" => self.blocks(BDN_BLOCKS_PATH, params).await,
            other => Err(Status::unimplemented(format!("{other} feed over gRPC"))),
        }
    }

    async fn call(&self, method: &str, params: &Value) -> Result<Value, Status> {
        match method {
            BLXR_TX => {
                let request = BlxrTxRequest::from_params(params).map_err(invalid_params)?;
                let mut grpc = self.ready().await?;
                let codec = ProstCodec::<BlxrTxRequest, BlxrTxReply>::default();
                let reply = grpc
                    .unary(
                        self.request(request),
                        PathAndQuery::from_static(BLXR_TX_PATH),
                        codec,
                    )
                    .await?
                    .into_inner();
                Ok(json!({"tx_hash": reply.tx_hash}))
            }
            other => Err(Status::unimplemented(format!("{other} request over gRPC"))),
        }
    }
}

fn invalid_params(e: serde_json::Error) -> Status {
    Status::invalid_argument(e.to_string())
}

/// Metadata attached to every gateway call.
pub fn call_metadata(config: &Config) -> Result<MetadataMap, ConfigError> {
    let value = |v: &str| {
        MetadataValue::<Ascii>::from_str(v).map_err(|e| ConfigError::InvalidUrl {
            url: config.endpoint().map(|(_, u)| u.to_string()).unwrap_or_default(),
            reason: format!("metadata value {v:?}: {e}"),
        })
    };
    let mut metadata = MetadataMap::new();
    metadata.insert("authorization", value(&config.auth_header_value()?)?);
    metadata.insert("x-bloxroute-blockchain", value(&config.blockchain_network)?);
    metadata.insert("x-bloxroute-sdk-version", value(client_version())?);
    metadata.insert("x-bloxroute-code-language", value("rust")?);
    Ok(metadata)
}

/// Map a gRPC status to the caller-facing error taxonomy.
pub fn status_error(status: Status) -> HandlerError {
    use tonic::Code;
    match status.code() {
        Code::Unimplemented => HandlerError::Unsupported(status.message().to_string()),
        Code::InvalidArgument => HandlerError::InvalidParams(status.message().to_string()),
        Code::Unavailable | Code::Cancelled | Code::Aborted | Code::DeadlineExceeded => {
            HandlerError::Transport(TransportError::Grpc(status.to_string()))
        }
        code => HandlerError::Remote(chainfeed_core::RemoteError {
            code: code as i64,
            message: status.message().to_string(),
            data: None,
        }),
    }
}

/// `true` for failures a reopened stream will not fix.
pub(crate) fn is_permanent(status: &Status) -> bool {
    matches!(
        status.code(),
        tonic::Code::Unimplemented
            | tonic::Code::InvalidArgument
            | tonic::Code::Unauthenticated
            | tonic::Code::PermissionDenied
    )
}
