// Contracts Module - Read-only ABIs

pub mod erc20;
pub mod raffle;
pub mod raffle_factory;

// Public exports
pub use erc20::Erc20;
pub use raffle::Raffle;
pub use raffle_factory::RaffleFactory;
