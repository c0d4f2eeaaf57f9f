pub mod db;
pub mod minio;

pub use db::*;
pub use minio::*;
