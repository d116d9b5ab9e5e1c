//! Authentication and authorization for DuckGate.
//!
//! Architecture role:
//! - static password store and HS256 bearer tokens for the Flight handshake
//! - access policy stores (static configuration or remote resolve endpoint)
//! - the authorizer: policy check plus row-filter weaving into the AST
//!
//! Key modules:
//! - [`identity`]
//! - [`validator`]
//! - [`token`]
//! - [`policy`]
//! - [`authorizer`]

pub mod authorizer;
pub mod identity;
pub mod policy;
pub mod token;
pub mod validator;

pub use authorizer::{authorize, HiveProber};
pub use identity::Identity;
pub use policy::{PolicyStore, RemotePolicyStore, StaticPolicyStore};
pub use token::{issue_token, verify_token, Claims};
pub use validator::PasswordValidator;
