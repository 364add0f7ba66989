#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

//! # berth-core
//!
//! Cryptographic primitives for the berth mod-sandboxing pipeline.
//!
//! This crate provides:
//! - SHA-256 content hashing with a hex-serializable `Digest` type
//! - HMAC-SHA256 keyed MACs with constant-time verification
//! - Ed25519 signing for mod-type publishing
//!
//! ## Quick Start
//!
//! ```rust
//! use berth_core::{hmac_sha256, sha256, verify_hmac, Keypair};
//!
//! // Hash some content
//! let digest = sha256(b"module bytes");
//! assert_eq!(digest.as_bytes().len(), 32);
//!
//! // Bind a payload to a secret
//! let tag = hmac_sha256(b"user secret", b"payload");
//! assert!(verify_hmac(b"user secret", b"payload", &tag));
//!
//! // Sign a mod-type descriptor
//! let keypair = Keypair::generate();
//! let signature = keypair.sign(b"descriptor");
//! assert!(keypair.public_key().verify(b"descriptor", &signature));
//! ```

pub mod error;
pub mod hashing;
pub mod mac;
pub mod signing;

pub use error::{Error, Result};
pub use hashing::{sha256, sha256_hex, Digest};
pub use mac::{hmac_sha256, tag_from_slice, verify_hmac, MAC_LEN};
pub use signing::{Keypair, PublicKey, Signature};
