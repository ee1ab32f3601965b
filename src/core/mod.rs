//! # Core Protocol Components
//!
//! Low-level framing and message body serialization.
//!
//! ## Components
//! - **Codec**: Tokio codec for length-prefixed framing over byte streams
//! - **Serialization**: per-type body serializers (Bincode, JSON, MessagePack)
//!
//! ## Wire Format
//! ```text
//! [Length(4, LE)] [Payload(N)]
//! ```
//!
//! ## Safety Limits
//! - Declared lengths outside the configured `[min, max]` window are rejected
//!   before allocation
//! - A stream ending inside a frame is reported, never silently dropped

pub mod codec;
pub mod serialization;
