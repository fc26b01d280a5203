//! Datagram protocol for listing and fetching cached files

pub mod errors;
pub mod server;
pub mod wire;

pub use errors::ProtocolError;
pub use server::DatagramServer;
pub use wire::{
    encode_request, parse_response, Request, Response, MAX_DATAGRAM_SIZE, MAX_RANGE_PAYLOAD,
};
