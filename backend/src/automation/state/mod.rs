pub mod shared;

pub use shared::{ActionTicket, ArbiterSnapshot, ArbiterState, Phase};
