//! ADB public-key authentication: key pair storage and challenge signing.

pub mod keystore;

pub use keystore::{load_or_create_keypair, sign_token, AuthError, KeyPair};
