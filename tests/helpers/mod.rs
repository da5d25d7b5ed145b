#![allow(dead_code)]

pub mod hold;
pub mod mock_server;
pub mod scripted;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("courier=debug")
        .try_init();
}
