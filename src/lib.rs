pub mod mem;
pub mod sim;
pub mod traffic;
pub mod utils;
