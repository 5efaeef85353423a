// Library interface for feedloom modules
// This allows tests and other binaries to import modules

pub mod fetcher;
pub mod ssrf;
pub mod storage;
