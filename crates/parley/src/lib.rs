pub mod chat;
pub mod dispatcher;
pub mod errors;
pub mod eval;
pub mod invoker;
pub mod models;
pub mod multiplexer;
pub mod normalizer;
pub mod partial_json;
pub mod prompt_template;
pub mod protocol;
pub mod providers;
pub mod schema;
pub mod search;
pub mod systems;
pub mod workflow;
