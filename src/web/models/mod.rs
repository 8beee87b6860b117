pub mod pool_models;
