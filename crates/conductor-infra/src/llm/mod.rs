//! LLM provider implementations for LLM_PROMPT steps.

pub mod anthropic;
