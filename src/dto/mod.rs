/// Envelopes exchanged between processes over the broker.
pub mod events;
/// Health check response.
pub mod health;
/// Validation helpers shared by the payloads.
pub mod validation;
/// WebSocket client and server messages.
pub mod ws;
