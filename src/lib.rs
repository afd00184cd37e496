pub mod api;
pub mod config;
mod orm;
pub mod slug;
pub mod url_repo;
pub mod url_service;
