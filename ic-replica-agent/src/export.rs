//! A module to re-export types that are visible through the ic-replica-agent API.
#[doc(inline)]
pub use candid::types::principal::{Principal, PrincipalError};
#[doc(inline)]
pub use ic_request_types::{Delegation, SignedDelegation};
