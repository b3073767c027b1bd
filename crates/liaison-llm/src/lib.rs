//! # liaison-llm
//!
//! Language-capability provider abstraction for the Liaison workflow
//! engine. The [`Provider`](provider::Provider) trait exposes the
//! capabilities the stage sequencer needs (perspective classification,
//! gap analysis, and a streaming translation) behind a uniform error
//! taxonomy with retryability and stable categories.
//!
//! One HTTP backend is provided: [`openai::OpenAiCompatProvider`], which
//! speaks the OpenAI-compatible chat-completions protocol and therefore
//! covers both the `openai` and `qwen-max` model hints (DashScope exposes
//! a compatible endpoint). Backend selection happens once, at session
//! start, through the [`factory::ProviderFactory`], never by runtime
//! type inspection.

#![deny(unsafe_code)]

pub mod factory;
pub mod openai;
pub mod prompts;
pub mod provider;

pub use factory::{OpenAiCompatFactory, ProviderFactory};
pub use provider::{
    GapAnalysis, Provider, ProviderError, ProviderResult, TokenChunk, TokenStream,
    TranslateRequest,
};
