pub mod client;
pub mod models;
pub mod parse;
pub mod prompts;

pub use client::{
    call_structured, parse_structured_content, ClientSettings, LlmError, LlmResponse,
    OpenRouterClient, StructuredLlm, StructuredRequest, StructuredResponse, OPENROUTER_URL,
};
pub use models::{Model, ModelIds};
