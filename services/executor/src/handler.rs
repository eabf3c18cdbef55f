//! Ordered-map command handler: dispatches the envelope tag and mutates
//! the shared store.

use codec::{
    serialize_response, AddItemRequest, AddItemResponse, CommandEnvelope, CommandType,
    DeleteItemRequest, DeleteItemResponse, ErrorResponse, GetAllItemsRequest, GetAllItemsResponse,
    GetItemRequest, GetItemResponse, KeyValuePair,
};
use kvstore::OrderedMap;
use serde::Serialize;
use tracing::warn;

use crate::consumer::RequestHandler;

/// Fallback body for a response that itself fails to serialize.
const INTERNAL_ERROR_BODY: &str = r#"{"success":false,"message":"internal error"}"#;

/// Executes command envelopes against an insertion-ordered map.
///
/// Every path returns a JSON response body; malformed input produces an
/// error envelope, never a transport-level failure.
pub struct MapCommandHandler {
    store: OrderedMap<String, String>,
}

impl MapCommandHandler {
    pub fn new() -> Self {
        Self {
            store: OrderedMap::new(),
        }
    }

    pub fn store(&self) -> &OrderedMap<String, String> {
        &self.store
    }

    fn handle_add_item(&self, envelope: &CommandEnvelope) -> String {
        let request: AddItemRequest = match envelope.decode_payload() {
            Ok(request) => request,
            Err(e) => {
                warn!("invalid addItem payload: {e}");
                return error_body("invalid payload for addItem");
            }
        };

        self.store.store(request.key, request.value);
        to_body(&AddItemResponse {
            success: true,
            message: Some("item added".to_string()),
        })
    }

    fn handle_delete_item(&self, envelope: &CommandEnvelope) -> String {
        let request: DeleteItemRequest = match envelope.decode_payload() {
            Ok(request) => request,
            Err(e) => {
                warn!("invalid deleteItem payload: {e}");
                return error_body("invalid payload for deleteItem");
            }
        };

        let response = match self.store.delete(&request.key) {
            Ok(()) => DeleteItemResponse {
                success: true,
                message: Some("item deleted".to_string()),
            },
            Err(_) => DeleteItemResponse {
                success: false,
                message: Some("key not found".to_string()),
            },
        };
        to_body(&response)
    }

    fn handle_get_item(&self, envelope: &CommandEnvelope) -> String {
        let request: GetItemRequest = match envelope.decode_payload() {
            Ok(request) => request,
            Err(e) => {
                warn!("invalid getItem payload: {e}");
                return error_body("invalid payload for getItem");
            }
        };

        let response = match self.store.get(&request.key) {
            Ok(value) => GetItemResponse {
                success: true,
                value: Some(value),
                message: None,
            },
            Err(_) => GetItemResponse {
                success: false,
                value: None,
                message: Some("key not found".to_string()),
            },
        };
        to_body(&response)
    }

    fn handle_get_all(&self, envelope: &CommandEnvelope) -> String {
        if let Err(e) = envelope.decode_payload::<GetAllItemsRequest>() {
            warn!("invalid getAllItems payload: {e}");
            return error_body("invalid payload for getAllItems");
        }

        let items = self
            .store
            .get_all()
            .into_iter()
            .map(|(key, value)| KeyValuePair { key, value })
            .collect();
        to_body(&GetAllItemsResponse {
            success: true,
            items,
            message: None,
        })
    }
}

impl Default for MapCommandHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestHandler for MapCommandHandler {
    fn execute(&self, raw: &[u8]) -> Vec<u8> {
        let envelope = std::str::from_utf8(raw)
            .ok()
            .and_then(|raw| codec::deserialize_envelope(raw).ok());
        let Some(envelope) = envelope else {
            warn!("failed to deserialize command envelope");
            return error_body("invalid command").into_bytes();
        };

        let body = match envelope.command_type {
            CommandType::AddItem => self.handle_add_item(&envelope),
            CommandType::DeleteItem => self.handle_delete_item(&envelope),
            CommandType::GetItem => self.handle_get_item(&envelope),
            CommandType::GetAllItems => self.handle_get_all(&envelope),
            CommandType::Unknown => error_body("unknown command type"),
        };
        body.into_bytes()
    }
}

fn to_body<T: Serialize>(response: &T) -> String {
    match serialize_response(response) {
        Ok(body) => body,
        Err(e) => {
            warn!("failed to serialize response: {e}");
            INTERNAL_ERROR_BODY.to_string()
        }
    }
}

fn error_body(message: &str) -> String {
    to_body(&ErrorResponse::new(message))
}
