//! # Tangle Chain
//!
//! Composable execution chains: the `Chain` trait with its lifecycle
//! (memory merge, callback hooks, output shaping), the prompt-plus-model
//! `LlmChain`, and the document combination strategies (stuff,
//! map-reduce, refine, map-rerank, token-budgeted reduce).

pub mod base;
pub mod combine;
pub mod error;
pub mod llm_chain;
pub mod prompt;

pub use base::{CHAIN_ERROR_KEY, Chain};
pub use combine::{
    CombineDocumentsChain, INPUT_DOCUMENTS_KEY, MapReduceDocumentChain, MapRerankDocumentChain,
    QUESTION_KEY, ReduceDocumentChain, RefineDocumentChain, StuffDocumentChain, document_inputs,
};
pub use error::{ChainError, Result};
pub use llm_chain::{DEFAULT_STOP, LlmChain, TEXT_KEY};
pub use prompt::{PromptTemplate, format_document};
