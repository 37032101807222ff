pub mod config;
pub mod error;
pub mod ledger;
pub mod logger;
pub mod manager;
pub mod policy;
pub mod store;
pub mod transport;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use config::{CacheConfiguration, Config};
pub use error::{CacheError, TransportError, TransportErrorKind};
pub use manager::NetworkCacheManager;
pub use policy::CachePolicy;

pub mod prelude {
    pub use crate::config::{CacheConfiguration, Config};
    pub use crate::error::{CacheError, TransportError, TransportErrorKind};
    pub use crate::ledger::{FileLedger, MemoryLedger, TimeToLiveLedger};
    pub use crate::manager::NetworkCacheManager;
    pub use crate::policy::CachePolicy;
    pub use crate::store::{ByteStore, CacheUsage, TieredByteStore};
    pub use crate::transport::{HyperTransport, Transport};
}
