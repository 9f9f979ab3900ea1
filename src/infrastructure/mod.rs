pub mod auth;
pub mod config;
pub mod db;
pub mod freee;
pub mod mailer;
pub mod state;
pub mod storage;
