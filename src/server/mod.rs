pub mod response;
pub mod service;

pub use response::{status_reason, BufferedResponse};
pub use service::{forwarded_client, request_info, GatewayService, RouteResolver, RunningGateway};
