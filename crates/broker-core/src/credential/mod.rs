//! Scoped database credentials: generation, provisioning and in-memory holding

mod password;
mod provisioner;
mod types;

pub use password::{random_identifier, OsRngPasswordGenerator, PasswordGenerator, PasswordPolicy};
pub use provisioner::CredentialProvisioner;
pub use types::*;
