pub mod intent_router;
pub mod regex_router;
pub mod retriever;
