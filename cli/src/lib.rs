pub mod cli_args;
pub mod storage_config;
