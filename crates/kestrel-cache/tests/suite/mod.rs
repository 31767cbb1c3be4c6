mod checksum_store;
mod entry_store_concurrency;
