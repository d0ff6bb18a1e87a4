//! Resumable FTP retrieval of meteorological and hydrological datasets.

pub mod config;
pub mod ftp;
pub mod unpack;
