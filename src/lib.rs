pub mod config;
pub mod error;
pub mod implementations;
pub mod layers;
pub mod notify;
pub mod types;
pub mod wallet;

#[cfg(test)]
pub(crate) mod test_support;
