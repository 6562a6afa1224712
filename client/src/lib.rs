#[macro_use]
extern crate derive_new;

mod error;

pub mod address;
pub mod auth;
pub mod cache;
pub mod config;
pub mod election;
pub mod gateway;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod task;
pub mod wallet;

pub use address::Address;
pub use auth::{
    AuthState,
    Authenticator,
    Session,
};
pub use config::Config;
pub use election::{
    Aggregator,
    Election,
    ElectionResult,
};
pub use error::{
    Error,
    Result,
};
pub use gateway::{
    Bindings,
    Gateway,
};
pub use wallet::WalletConnector;
