pub mod pipeline;
pub mod server;
pub mod upstream;

pub use pipeline::{ForwardingPipeline, InboundRequest, ProxyResponse};
pub use server::{ProxyState, build_proxy_router, start_proxy};
pub use upstream::{HttpUpstream, OutboundRequest, UpstreamClient, UpstreamResponse};
