pub mod admin;
pub mod client;
pub mod dispute;
pub mod hold;
pub mod init;
pub mod payment;
pub mod status;
pub mod wallet;
