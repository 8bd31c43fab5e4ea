pub mod activity_aggregator;
pub mod address_validator;
pub mod balance_oracle;
pub mod confirmation_tracker; // 交易确认轮询
pub mod secret_store;
pub mod transaction_engine;
