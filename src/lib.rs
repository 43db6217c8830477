//! # keyfob
//!
//! physical-factor gated custody of a sealed vault's unseal keys.
//!
//! instead of typing or pasting unseal shares, each share is released by a
//! physical authentication event: a fingerprint match or an rfid tag tap.
//! shares are sealed with an aead at rest and live either in a flat record
//! file (fingerprint variant) or chunked onto 16-byte tag blocks (token
//! variant).
//!
//! ```text
//! ┌──────────────┐  init / unseal / generate-root   ┌──────────────┐
//! │ coordinator  │ ───────────── http ────────────► │ sealed vault │
//! └──────┬───────┘                                  └──────────────┘
//!        │ one event gates one share
//!        ▼
//! ┌──────────────┐   chacha20poly1305   ┌─────────────────────────┐
//! │ share vault  │ ◄──── sealed ct ───► │ record file / tag blocks│
//! └──────┬───────┘                      └─────────────────────────┘
//!        ▼
//!   fingerprint sensor or tag reader
//! ```
//!
//! ## security properties
//!
//! - shares never rest in plaintext; the aead makes tampering detectable
//! - one physical event releases at most one share
//! - nothing durable is written until every share of a run is stored
//! - losing the key file loses all shares permanently (accepted risk)

pub mod blocks;
pub mod codec;
pub mod device;
pub mod error;
pub mod factor;
pub mod protocol;
pub mod remote;

pub use codec::{ShareKey, ShareRecord};
pub use error::{Error, Result};
pub use factor::{AuthEvent, EnrollOutcome, FingerVault, ShareVault, TokenVault};
pub use protocol::{Coordinator, GeneratedRoot, UnsealOutcome};
pub use remote::{HttpSealedClient, SealedApi};
