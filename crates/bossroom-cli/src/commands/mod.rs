pub mod battle;
pub mod config;
pub mod remind;
pub mod rest;
pub mod stats;

mod session;
