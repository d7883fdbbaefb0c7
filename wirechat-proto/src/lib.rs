//! Wire protocol types shared between WireChat clients and backends.
//!
//! Every socket message in either direction is a JSON text frame carrying an
//! [`envelope::Envelope`]; the `event` tag selects the payload shape. This
//! crate owns the envelope, the typed payloads, the inbound demultiplexer,
//! and the frame codec, so the client and the test backend agree on the
//! contract by construction.

pub mod ack;
pub mod codec;
pub mod envelope;
pub mod event;
pub mod message;
pub mod outbound;
pub mod presence;
pub mod typing;
pub mod user;
