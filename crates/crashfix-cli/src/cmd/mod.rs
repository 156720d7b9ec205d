pub mod approve;
pub mod init;
pub mod run;
pub mod status;
