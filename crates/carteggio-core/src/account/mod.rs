//! Account configuration and server URIs.

mod model;
mod uri;
mod validation;

pub use model::Account;
pub use uri::{Protocol, Scheme, Security, ServerUri};
pub use validation::{ValidationError, ValidationResult, validate_account};
