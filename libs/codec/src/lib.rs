//! Command envelope model and JSON codec.
//!
//! Every message on the wire is a tagged envelope `{"type": ..., "payload":
//! ...}`. The payload is carried as raw JSON so it can be decoded lazily by
//! the handler once the tag has been dispatched on; an unknown tag is a
//! valid envelope and surfaces to the handler, not a decode failure.

pub mod command;
pub mod error;

pub use command::{
    deserialize_command, deserialize_envelope, deserialize_response, serialize_command,
    serialize_response, AddItemRequest, AddItemResponse, CommandEnvelope, CommandType,
    DeleteItemRequest, DeleteItemResponse, ErrorResponse, GetAllItemsRequest, GetAllItemsResponse,
    GetItemRequest, GetItemResponse, KeyValuePair,
};
pub use error::CodecError;
