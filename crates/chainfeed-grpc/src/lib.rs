//! chainfeed-grpc: gRPC streaming feed handler for self-hosted gateways.
//!
//! Each subscription is its own server stream, read by one task; requests
//! are unary calls. The [`GatewayApi`] trait is the seam between the handler
//! and tonic, so the handler can run against any implementation.

pub mod gateway;
pub mod handler;
pub mod proto;

pub use gateway::{GatewayApi, TonicGateway, BLXR_TX, STREAMED_FEEDS};
pub use handler::GrpcHandler;
