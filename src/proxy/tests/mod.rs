pub mod signature_concurrency;
