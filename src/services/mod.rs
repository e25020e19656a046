/// Cached balance reads and local adjustments.
pub mod balance;
/// OpenAPI documentation generation.
pub mod documentation;
/// Cross-process publish/subscribe of game events.
pub mod fanout;
/// Reactions to fan-out events on every process.
pub mod game_events;
/// Points and eliminations applied to the shared game snapshot.
pub mod game_play;
/// Health check service.
pub mod health_service;
/// Broker key layout.
pub mod keys;
/// Broker-backed locks shared by every process.
pub mod lock;
/// Staging game assembly and departures.
pub mod matchmaker;
/// Player message handling.
pub mod player_service;
/// Durable task queue on top of the broker lists.
pub mod queue;
/// Reconciliation records for ledger operations that need manual follow-up.
pub mod reconciliation;
/// Background task payloads.
pub mod tasks;
/// WebSocket connection and message handling service.
pub mod websocket_service;
/// Queue consumers and the stalled-task sweep.
pub mod worker;
