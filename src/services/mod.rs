pub mod credential_cipher;
pub mod pool_manager;
