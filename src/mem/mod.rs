pub mod backing;
pub mod cmdbus;
pub mod ctrl;
pub mod dram;
pub mod media;
pub mod nvm;
pub mod request;
pub mod stats;
pub mod tags;
