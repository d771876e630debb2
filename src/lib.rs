pub mod error;
pub mod hostport;
pub mod iptables;

pub use error::{Error, Result};
pub use hostport::manager::HostportManager;
pub use hostport::meta::MetaHostportManager;
pub use hostport::{PodPortMapping, PortMapping, Protocol};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
