pub mod voting;
