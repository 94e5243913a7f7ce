/// HTTP and WebSocket request handlers
pub mod rest;
pub mod websocket;
