pub mod semantic_cache;
