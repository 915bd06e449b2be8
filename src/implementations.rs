pub mod gateway;
pub mod network;
pub mod tracker;
