pub mod db;
pub mod domain;
pub mod error;
pub mod export;
pub mod normalize;
pub mod repo;
