//! Interface index to name resolution
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-8: System Component Inventory - Interface resolution

use crate::error::Result;

/// Resolves kernel interface indices to names
#[cfg_attr(test, mockall::automock)]
pub trait IfNameResolver: Send + Sync {
    fn resolve(&self, if_index: u32) -> Result<String>;
}

#[cfg(target_os = "linux")]
mod linux {
    use super::IfNameResolver;
    use crate::error::{NatsyncError, Result};
    use tracing::debug;

    /// Resolver backed by `if_indextoname(3)`
    ///
    /// Names are looked up on every call; interfaces come and go with
    /// neighbor events so nothing is cached.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct SystemIfNameResolver;

    impl IfNameResolver for SystemIfNameResolver {
        fn resolve(&self, if_index: u32) -> Result<String> {
            match nix::net::if_::if_indextoname(if_index) {
                Ok(name) => Ok(name.to_string_lossy().into_owned()),
                Err(errno) => {
                    debug!(if_index, %errno, "if_indextoname failed");
                    Err(NatsyncError::InterfaceNotFound(if_index))
                }
            }
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux::*;

/// Mock implementation for non-Linux platforms (development only)
#[cfg(not(target_os = "linux"))]
mod mock {
    use super::IfNameResolver;
    use crate::error::{NatsyncError, Result};

    #[derive(Debug, Default, Clone, Copy)]
    pub struct SystemIfNameResolver;

    impl IfNameResolver for SystemIfNameResolver {
        fn resolve(&self, if_index: u32) -> Result<String> {
            Err(NatsyncError::InterfaceNotFound(if_index))
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub use mock::*;
