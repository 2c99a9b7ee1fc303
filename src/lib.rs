pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod forwarding;
pub mod gateway;
pub mod ssh_config;
pub mod transport;
pub mod utils;

pub use config::Defaults;
pub use connection::Connection;
pub use endpoint::{resolve, EndpointSpec, Gateway, GatewayOverride, HostEntry, Overrides};
pub use error::ResolveError;
pub use forwarding::{ForwardHandle, ForwardingConfig, SessionFailure};
pub use ssh_config::{HostDirectives, SshConfigLookup, StaticSshConfig};
pub use transport::Transport;
