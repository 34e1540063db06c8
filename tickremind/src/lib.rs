#[macro_use]
extern crate diesel;

pub mod config;
pub mod dashboard;
pub mod db;
pub mod import;
pub mod proto;
pub mod util;
pub mod webserver;
