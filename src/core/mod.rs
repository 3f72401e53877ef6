pub mod connections;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod registry;
pub mod routes;
pub mod stream;

pub use connections::{Connection, ConnectionTracker};
pub use dispatcher::{Completion, Dispatcher};
pub use error::{GatewayError, Result};
pub use gateway::Gateway;
pub use metrics::{MetricsAggregator, MetricsSnapshot};
pub use registry::{Model, ModelCapabilities, ModelCost, Provider, ProviderKind, Registry};
pub use routes::{RouteRule, RouteTable, RouteTarget};
pub use stream::{ReplyChunk, StreamManager};
