pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod request_meta;
pub mod security;
pub mod settings_file;
pub mod state;
pub mod status_board;
pub mod users;
