//! Platform queries used by the archiver.

pub mod space;
