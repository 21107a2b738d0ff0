#![allow(unused_imports)]

pub use super::delegation::Entity as Delegation;
pub use super::participant::Entity as Participant;
pub use super::vote::Entity as Vote;
pub use super::voting_result::Entity as VotingResult;
