// Library for tests to access modules

pub mod config;
pub mod device_repo;
pub mod error;
pub mod history_repo;
pub mod models;
pub mod render;
pub mod routes;
pub mod series;
pub mod version;
pub mod worker;
