pub mod cache_entry;
pub mod token_cache;
pub mod token_record;
