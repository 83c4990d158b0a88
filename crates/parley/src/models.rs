//! These models represent the objects passed around by the orchestrator
//!
//! There are several different related formats we need to interact with:
//! - ai-sdk `useChat` UI messages, sent from the interface to the server
//! - ai-sdk UI message stream chunks, sent from the server back to the interface
//! - openai-compatible chat completion messages/tools, sent to the LLM
//! - system requests, sent from the dispatcher to the systems providing tools
//!
//! We always convert at the boundary into the internal structs here. Because the
//! formats only partially overlap, the internal models are not an exact match
//! to any of them.
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
pub mod ui;
