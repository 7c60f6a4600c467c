//! Request/response pipeline to the remote auction endpoint (CDB).
//!
//! The gateway owns the wire format: it serializes a fetch for a set of ad
//! units, performs the HTTP POST, and deserializes the response into bids
//! plus any kill-switch update. A malformed response is a failure; a single
//! malformed slot inside an otherwise valid response is skipped.

mod cdb;
mod http;
mod types;
mod wire;

pub use cdb::{CdbGateway, GatewayConfig};
pub use http::{AsyncHttpClient, AsyncReqwestClient};
pub use types::{
    AuctionGateway, DeviceInfo, FetchResult, GatewayError, PublisherInfo, RequestContext,
};
