pub mod delegation;
pub mod participant;
pub mod prelude;
pub mod vote;
pub mod voting_result;
