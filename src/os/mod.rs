//! Queries of the running system: accounts, disks and network

pub mod disks;
pub mod network;
pub mod user;
