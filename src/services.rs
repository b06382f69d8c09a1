pub mod checksum;
pub mod hooks;
pub mod locks;
pub mod range;
pub mod states;
pub mod sweeper;
