//! Shared building blocks for the RELQD services.
//!
//! - `interfaces`: Solidity interfaces of the token factory and the per-asset
//!   satellite contracts, declared with `sol!`
//! - `address`: zero-address checks and topic padding
//! - `fixed_string`: decoding of NUL-terminated names packed into `bytes32`

pub mod interfaces {
    pub mod asset_token;
    pub mod controller;
    pub mod converter;
    pub mod distribution;
    pub mod sale_manager;
    pub mod token_factory;
}

pub mod address;
pub mod fixed_string;
