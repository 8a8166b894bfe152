pub mod coordinator;
pub mod peer_buffer;
pub mod persist;
pub mod worker;
