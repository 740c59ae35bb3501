pub mod fingerprint;
pub mod password;
pub mod password_policy;

pub use fingerprint::{device_fingerprint, token_fingerprint};
pub use password::{Argon2Hasher, CredentialHasher, Password, PasswordHashString};
pub use password_policy::PasswordPolicy;
